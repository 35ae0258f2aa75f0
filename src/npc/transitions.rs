use crate::models::{AiState, NpcShipType};

/// Chance per tick that a ship samples the transition table at all.
pub const TRANSITION_CHANCE: f64 = 0.005;

/// Sample the per-type AI transition table. `roll` is uniform in [0,1);
/// returns None when the ship stays in its current state. Pure so the
/// tables are testable without an rng.
pub fn sample_transition(
    ship_type: NpcShipType,
    current: AiState,
    roll: f64,
) -> Option<AiState> {
    use AiState::*;
    match ship_type {
        NpcShipType::Enemy => match current {
            Patrolling if roll < 0.3 => Some(Attacking),
            Attacking if roll < 0.2 => Some(Patrolling),
            Attacking if roll < 0.3 => Some(Fleeing),
            Fleeing if roll < 0.5 => Some(Patrolling),
            _ => None,
        },
        NpcShipType::Transport => {
            if current != Patrolling {
                if roll < 0.7 {
                    Some(Patrolling)
                } else if roll < 0.9 {
                    Some(Docking)
                } else {
                    None
                }
            } else if roll < 0.2 {
                Some(Docking)
            } else {
                None
            }
        }
        NpcShipType::Civilian => {
            if roll < 0.4 {
                Some(Patrolling)
            } else if roll < 0.7 {
                Some(Idle)
            } else {
                Some(Docking)
            }
        }
        NpcShipType::Mining => {
            if roll < 0.7 {
                Some(Mining)
            } else if roll < 0.9 {
                Some(Patrolling)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AiState::*;

    #[test]
    fn test_enemy_table() {
        assert_eq!(
            sample_transition(NpcShipType::Enemy, Patrolling, 0.1),
            Some(Attacking)
        );
        assert_eq!(sample_transition(NpcShipType::Enemy, Patrolling, 0.5), None);
        assert_eq!(
            sample_transition(NpcShipType::Enemy, Attacking, 0.1),
            Some(Patrolling)
        );
        assert_eq!(
            sample_transition(NpcShipType::Enemy, Attacking, 0.25),
            Some(Fleeing)
        );
        assert_eq!(
            sample_transition(NpcShipType::Enemy, Fleeing, 0.4),
            Some(Patrolling)
        );
        assert_eq!(sample_transition(NpcShipType::Enemy, Fleeing, 0.9), None);
    }

    #[test]
    fn test_transport_prefers_patrolling() {
        assert_eq!(
            sample_transition(NpcShipType::Transport, Docking, 0.5),
            Some(Patrolling)
        );
        assert_eq!(
            sample_transition(NpcShipType::Transport, Docking, 0.8),
            Some(Docking)
        );
        assert_eq!(
            sample_transition(NpcShipType::Transport, Docking, 0.95),
            None
        );
        // patrolling transports only dock at the 0.2 rate
        assert_eq!(
            sample_transition(NpcShipType::Transport, Patrolling, 0.1),
            Some(Docking)
        );
        assert_eq!(
            sample_transition(NpcShipType::Transport, Patrolling, 0.5),
            None
        );
        assert_eq!(
            sample_transition(NpcShipType::Transport, Patrolling, 0.8),
            None
        );
    }

    #[test]
    fn test_mining_biased_toward_mining() {
        assert_eq!(
            sample_transition(NpcShipType::Mining, Patrolling, 0.3),
            Some(Mining)
        );
        assert_eq!(
            sample_transition(NpcShipType::Mining, Mining, 0.8),
            Some(Patrolling)
        );
        assert_eq!(sample_transition(NpcShipType::Mining, Mining, 0.95), None);
    }

    #[test]
    fn test_civilian_covers_three_states() {
        assert_eq!(
            sample_transition(NpcShipType::Civilian, Idle, 0.2),
            Some(Patrolling)
        );
        assert_eq!(
            sample_transition(NpcShipType::Civilian, Idle, 0.5),
            Some(Idle)
        );
        assert_eq!(
            sample_transition(NpcShipType::Civilian, Idle, 0.8),
            Some(Docking)
        );
    }
}
