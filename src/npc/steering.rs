use crate::models::{AiState, NavState, NpcShip, ShipTemplate, Vector3};
use rand::Rng;

/// Scalar applied to the illustrative inverse-square gravity pull.
pub const GRAVITY_STRENGTH: f32 = 20.0;

/// Closest-approach margin added to an obstacle's radius for the
/// pre-emptive avoidance check.
pub const AVOIDANCE_MARGIN: f32 = 50.0;

/// Seconds of velocity projection used for the closest-approach check.
const AVOIDANCE_HORIZON: f32 = 3.0;

/// Fraction of max acceleration below which an avoidance push is
/// considered spent.
const AVOIDANCE_SETTLE_FRACTION: f32 = 0.05;

const FORMATION_RADIUS: f32 = 150.0;
const FORMATION_HEIGHT: f32 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct Obstacle {
    pub position: Vector3,
    pub radius: f32,
}

/// Read-only view of a fleet leader for formation keeping.
#[derive(Debug, Clone)]
pub struct LeaderView {
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: crate::models::Quaternion,
    pub follower_count: u32,
}

/// Inverse-square pull toward the nearest body.
pub fn gravity_accel(position: &Vector3, body_position: &Vector3, body_mass: f32) -> Vector3 {
    let to_body = body_position.sub(position);
    let dist_sq = to_body.dot(&to_body).max(1.0);
    to_body
        .normalize()
        .scale(GRAVITY_STRENGTH * body_mass / dist_sq)
}

/// Acceleration for a patrolling ship: occasionally pick a fresh random
/// heading and push at half power.
pub fn patrol_accel(params: &ShipTemplate, rng: &mut impl Rng) -> Vector3 {
    if rng.random::<f64>() >= 0.01 {
        return Vector3::ZERO;
    }
    random_unit(rng).scale(params.max_acceleration * 0.5)
}

/// Hold a band of radius ~2x body radius around the nearest body,
/// drifting gently along the band once inside it.
pub fn mining_accel(
    ship: &NpcShip,
    params: &ShipTemplate,
    body_position: &Vector3,
    body_radius: f32,
) -> Vector3 {
    let band = body_radius * 2.0;
    let from_body = ship.position.sub(body_position);
    let dist = from_body.length();
    if dist < 1.0 {
        // degenerate: sitting on the body center, push out along +X
        return Vector3::new(params.max_acceleration, 0.0, 0.0);
    }
    let radial = from_body.normalize();
    let err = dist - band;
    if err.abs() > band * 0.25 {
        // outside the band: accelerate inward (or outward) to rejoin it
        radial.scale(-err.signum() * params.max_acceleration * 0.6)
    } else {
        // inside the band: gentle orbital drift
        let tangent = radial.cross(&Vector3::new(0.0, 1.0, 0.0)).normalize();
        tangent.scale(params.max_acceleration * 0.3)
    }
}

/// Steer toward the head of the waypoint list, consuming it on arrival.
/// Returns the acceleration; mutates waypoint bookkeeping on the ship.
pub fn waypoint_accel(ship: &mut NpcShip, params: &ShipTemplate, dt: f32) -> Vector3 {
    if ship.dwell_remaining > 0.0 {
        ship.dwell_remaining = (ship.dwell_remaining - dt).max(0.0);
        return brake_accel(ship, params);
    }
    let Some(waypoint) = ship.waypoints.first().cloned() else {
        finish_path(ship);
        return Vector3::ZERO;
    };
    let to_target = waypoint.position.sub(&ship.position);
    let dist = to_target.length();
    let arrival = waypoint.radius.max(params.waypoint_arrival_distance);

    if dist <= arrival {
        ship.waypoints.remove(0);
        ship.waypoints_completed += 1;
        if let Some(wait) = waypoint.wait_time {
            ship.dwell_remaining = wait;
        }
        let total = ship.waypoints_completed as f32 + ship.waypoints.len() as f32;
        ship.path_completion_pct = ship.waypoints_completed as f32 / total * 100.0;
        if ship.waypoints.is_empty() {
            finish_path(ship);
        }
        return Vector3::ZERO;
    }

    // taper toward arrival, floored at 20% of max speed
    let taper = (dist / (3.0 * arrival)).clamp(0.2, 1.0);
    let mut target_speed = params.max_speed * taper;
    if let Some(cap) = waypoint.max_speed {
        target_speed = target_speed.min(cap);
    }
    let desired = to_target.normalize().scale(target_speed);
    desired
        .sub(&ship.velocity)
        .clamp_length(params.max_acceleration)
}

fn finish_path(ship: &mut NpcShip) {
    ship.path_completion_pct = 100.0;
    ship.ai_state = AiState::Patrolling;
    ship.nav_state = NavState::None;
    ship.waypoints.clear();
}

/// Slot position on a circle in the leader's frame: slot `i` of `n` at
/// angle 2πi/n, alternating above/below the plane.
pub fn formation_slot_offset(slot: u32, slot_count: u32) -> Vector3 {
    let n = slot_count.max(1);
    let theta = std::f32::consts::TAU * slot as f32 / n as f32;
    let h = if slot % 2 == 0 {
        FORMATION_HEIGHT
    } else {
        -FORMATION_HEIGHT
    };
    Vector3::new(
        theta.cos() * FORMATION_RADIUS,
        theta.sin() * FORMATION_RADIUS,
        h,
    )
}

/// PD-style slot keeping: close on the leader-relative slot with the
/// leader's velocity as feed-forward.
pub fn formation_accel(ship: &NpcShip, params: &ShipTemplate, leader: &LeaderView) -> Vector3 {
    let slot = ship.formation_slot.unwrap_or(0);
    let offset = leader
        .rotation
        .rotate(&formation_slot_offset(slot, leader.follower_count));
    let slot_pos = leader.position.add(&offset);
    let to_slot = slot_pos.sub(&ship.position);
    if to_slot.length() <= params.formation_keeping_tolerance {
        // inside the deadband: just match the leader
        return leader
            .velocity
            .sub(&ship.velocity)
            .clamp_length(params.max_acceleration);
    }
    let closing = to_slot.clamp_length(params.max_speed);
    let target_velocity = closing.add(&leader.velocity);
    target_velocity
        .sub(&ship.velocity)
        .scale(2.0)
        .clamp_length(params.max_acceleration)
}

/// Sum of inverse-square-weighted pushes away from nearby obstacles.
/// Returns None once no significant push remains.
pub fn avoidance_accel(
    ship: &NpcShip,
    params: &ShipTemplate,
    obstacles: &[Obstacle],
) -> Option<Vector3> {
    let mut total = Vector3::ZERO;
    for obstacle in obstacles {
        let away = ship.position.sub(&obstacle.position);
        let dist = away.length();
        if dist > params.obstacle_avoidance_distance || dist < 1e-3 {
            continue;
        }
        let weight = 1.0 / (dist * dist).max(1.0);
        total = total.add(&away.normalize().scale(weight));
    }
    let accel = total.scale(params.max_acceleration * 1.0e4).clamp_length(params.max_acceleration);
    if accel.length() < params.max_acceleration * AVOIDANCE_SETTLE_FRACTION {
        None
    } else {
        Some(accel)
    }
}

/// Closest approach along the current velocity over a short horizon; true
/// when a collision course exists.
pub fn on_collision_course(ship: &NpcShip, obstacles: &[Obstacle], scan_radius: f32) -> bool {
    let speed = ship.velocity.length();
    if speed < 1.0 {
        return false;
    }
    for obstacle in obstacles {
        let rel = obstacle.position.sub(&ship.position);
        if rel.length() > scan_radius {
            continue;
        }
        let t = (rel.dot(&ship.velocity) / (speed * speed)).clamp(0.0, AVOIDANCE_HORIZON);
        let closest = ship.position.add(&ship.velocity.scale(t));
        if closest.distance(&obstacle.position) < obstacle.radius + AVOIDANCE_MARGIN {
            return true;
        }
    }
    false
}

/// Mild braking opposite to travel.
pub fn brake_accel(ship: &NpcShip, params: &ShipTemplate) -> Vector3 {
    if ship.velocity.length() <= 1.0 {
        return Vector3::ZERO;
    }
    ship.velocity
        .normalize()
        .scale(-0.2 * params.max_acceleration)
}

pub fn random_unit(rng: &mut impl Rng) -> Vector3 {
    loop {
        let v = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let len = v.length();
        if len > 1e-3 && len <= 1.0 {
            return v.scale(1.0 / len);
        }
    }
}
