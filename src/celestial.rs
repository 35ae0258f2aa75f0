use crate::models::{CelestialBody, CelestialBodyType, Orbit, Vector3};
use dashmap::DashMap;
use log::*;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Mutex;
use std::time::Instant;

pub const MIN_SIMULATION_SPEED: f64 = 0.1;
pub const MAX_SIMULATION_SPEED: f64 = 1000.0;

const KEPLER_MAX_ITERATIONS: usize = 8;
const KEPLER_TOLERANCE: f64 = 1e-6;

struct SimClock {
    simulation_time: f64,
    speed: f64,
    frozen: bool,
    last_wall: Option<Instant>,
}

/// Advances celestial bodies on Keplerian orbits. Positions are a pure
/// function of `(body, simulation_time)`; `update()` only refreshes the
/// cached values.
pub struct CelestialSimulator {
    bodies: DashMap<u32, CelestialBody>,
    /// body ids sorted parents-first, so moons see fresh planet frames
    order: Mutex<Vec<u32>>,
    clock: Mutex<SimClock>,
}

impl CelestialSimulator {
    pub fn new(simulation_speed: f64) -> Self {
        Self {
            bodies: DashMap::new(),
            order: Mutex::new(Vec::new()),
            clock: Mutex::new(SimClock {
                simulation_time: 0.0,
                speed: simulation_speed.clamp(MIN_SIMULATION_SPEED, MAX_SIMULATION_SPEED),
                frozen: false,
                last_wall: None,
            }),
        }
    }

    pub fn add_body(&self, body: CelestialBody) {
        self.bodies.insert(body.id, body);
        self.reorder();
    }

    pub fn remove_body(&self, id: u32) -> bool {
        let removed = self.bodies.remove(&id).is_some();
        if removed {
            self.reorder();
        }
        removed
    }

    pub fn get_body(&self, id: u32) -> Option<CelestialBody> {
        self.bodies.get(&id).map(|b| b.clone())
    }

    pub fn bodies(&self) -> Vec<CelestialBody> {
        let order = self.order.lock().unwrap();
        order
            .iter()
            .filter_map(|id| self.bodies.get(id).map(|b| b.clone()))
            .collect()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn set_simulation_speed(&self, speed: f64) -> f64 {
        let clamped = speed.clamp(MIN_SIMULATION_SPEED, MAX_SIMULATION_SPEED);
        let mut clock = self.clock.lock().unwrap();
        clock.speed = clamped;
        info!("Simulation speed set to {}", clamped);
        clamped
    }

    pub fn simulation_speed(&self) -> f64 {
        self.clock.lock().unwrap().speed
    }

    pub fn simulation_time(&self) -> f64 {
        self.clock.lock().unwrap().simulation_time
    }

    pub fn freeze(&self, frozen: bool) {
        let mut clock = self.clock.lock().unwrap();
        clock.frozen = frozen;
        info!("Celestial simulation {}", if frozen { "frozen" } else { "resumed" });
    }

    /// Recompute the parents-first evaluation order.
    fn reorder(&self) {
        let mut ids: Vec<(u32, u32)> = self
            .bodies
            .iter()
            .map(|b| (b.id, Self::depth(&self.bodies, &b)))
            .collect();
        ids.sort_by_key(|(id, depth)| (*depth, *id));
        *self.order.lock().unwrap() = ids.into_iter().map(|(id, _)| id).collect();
    }

    fn depth(bodies: &DashMap<u32, CelestialBody>, body: &CelestialBody) -> u32 {
        let mut depth = 0;
        let mut parent = body.parent_id;
        while let Some(pid) = parent {
            depth += 1;
            if depth > 16 {
                error!("Cycle in celestial parent chain at body {}", body.id);
                break;
            }
            parent = bodies.get(&pid).and_then(|p| p.parent_id);
        }
        depth
    }

    /// Advance the simulation clock and refresh every cached position.
    /// Called on a ~1 s wall cadence by the orchestrator.
    pub fn update(&self) {
        let sim_time = {
            let mut clock = self.clock.lock().unwrap();
            let now = Instant::now();
            let dt = match clock.last_wall {
                Some(last) => now.duration_since(last).as_secs_f64(),
                None => 0.0,
            };
            clock.last_wall = Some(now);
            if !clock.frozen {
                clock.simulation_time += clock.speed * dt;
            }
            clock.simulation_time
        };
        self.recompute(sim_time);
    }

    /// Advance the clock by an explicit wall delta (deterministic paths
    /// and tests).
    pub fn advance(&self, wall_dt: f64) {
        let sim_time = {
            let mut clock = self.clock.lock().unwrap();
            if !clock.frozen {
                clock.simulation_time += clock.speed * wall_dt;
            }
            clock.simulation_time
        };
        self.recompute(sim_time);
    }

    fn recompute(&self, sim_time: f64) {
        let order = self.order.lock().unwrap().clone();
        for id in order {
            let Some(body) = self.bodies.get(&id).map(|b| b.clone()) else {
                continue;
            };
            let (position, velocity, progress) = if body.is_root() {
                (body.cached_position, Vector3::ZERO, 0.0)
            } else {
                let parent = body
                    .parent_id
                    .and_then(|pid| self.bodies.get(&pid).map(|p| p.clone()));
                match parent {
                    Some(parent) => orbital_state(
                        &body.orbit,
                        sim_time,
                        &parent.cached_position,
                        &parent.cached_velocity,
                    ),
                    None => (body.cached_position, Vector3::ZERO, 0.0),
                }
            };
            if let Some(mut body) = self.bodies.get_mut(&id) {
                body.cached_position = position;
                body.cached_velocity = velocity;
                body.orbit_progress = progress;
            }
        }
    }

    /// Current cached positions and velocities for every body.
    pub fn current_positions(&self) -> HashMap<u32, (Vector3, Vector3)> {
        self.bodies
            .iter()
            .map(|b| (b.id, (b.cached_position, b.cached_velocity)))
            .collect()
    }

    /// Body nearest to a point, with its distance.
    pub fn nearest_body(&self, point: &Vector3) -> Option<(u32, f32)> {
        self.bodies
            .iter()
            .map(|b| (b.id, b.cached_position.distance(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Seed a compact default system when the store holds no bodies.
    pub fn seed_default_system(&self) {
        let mut id = 0;
        let mut next_id = || {
            id += 1;
            id
        };
        let star_id = next_id();
        self.add_body(CelestialBody {
            id: star_id,
            name: "Helion".to_string(),
            body_type: CelestialBodyType::Star,
            parent_id: None,
            mass: 1.0e9,
            radius: 20000.0,
            orbit: Orbit {
                semi_major: 0.0,
                eccentricity: 0.0,
                inclination: 0.0,
                period: 1.0,
                phase: 0.0,
            },
            color: "#ffcc33".to_string(),
            cached_position: Vector3::ZERO,
            cached_velocity: Vector3::ZERO,
            orbit_progress: 0.0,
        });

        let planets = [
            ("Ferros", 60_000.0, 0.05, 0.02, 2_000.0, 1200.0, "#aa6644"),
            ("Viridia", 120_000.0, 0.02, 0.00, 5_000.0, 2600.0, "#44aa66"),
            ("Umbra", 260_000.0, 0.10, 0.08, 11_000.0, 3100.0, "#6677cc"),
            ("Kharon", 520_000.0, 0.21, 0.15, 26_000.0, 1500.0, "#99aabb"),
        ];
        let mut planet_ids = Vec::new();
        for (i, (name, a, e, incl, period, radius, color)) in planets.iter().enumerate() {
            let pid = next_id();
            planet_ids.push(pid);
            self.add_body(CelestialBody {
                id: pid,
                name: name.to_string(),
                body_type: CelestialBodyType::Planet,
                parent_id: Some(star_id),
                mass: 1.0e6,
                radius: *radius,
                orbit: Orbit {
                    semi_major: *a,
                    eccentricity: *e,
                    inclination: *incl,
                    period: *period,
                    phase: i as f64 * 1.3,
                },
                color: color.to_string(),
                cached_position: Vector3::ZERO,
                cached_velocity: Vector3::ZERO,
                orbit_progress: 0.0,
            });
        }

        for (i, (name, parent_idx)) in [("Viridia I", 1usize), ("Umbra I", 2usize)]
            .iter()
            .enumerate()
        {
            self.add_body(CelestialBody {
                id: next_id(),
                name: name.to_string(),
                body_type: CelestialBodyType::Moon,
                parent_id: Some(planet_ids[*parent_idx]),
                mass: 1.0e4,
                radius: 400.0,
                orbit: Orbit {
                    semi_major: 8_000.0,
                    eccentricity: 0.01,
                    inclination: 0.1,
                    period: 300.0,
                    phase: i as f64 * 2.0,
                },
                color: "#cccccc".to_string(),
                cached_position: Vector3::ZERO,
                cached_velocity: Vector3::ZERO,
                orbit_progress: 0.0,
            });
        }

        for i in 0..3 {
            self.add_body(CelestialBody {
                id: next_id(),
                name: format!("Belt-{}", i + 1),
                body_type: CelestialBodyType::Asteroid,
                parent_id: Some(star_id),
                mass: 500.0,
                radius: 120.0,
                orbit: Orbit {
                    semi_major: 180_000.0 + i as f64 * 6_000.0,
                    eccentricity: 0.3,
                    inclination: 0.05 * i as f64,
                    period: 8_000.0 + i as f64 * 700.0,
                    phase: i as f64 * 2.1,
                },
                color: "#887766".to_string(),
                cached_position: Vector3::ZERO,
                cached_velocity: Vector3::ZERO,
                orbit_progress: 0.0,
            });
        }

        self.add_body(CelestialBody {
            id: next_id(),
            name: "Waystation Kilo".to_string(),
            body_type: CelestialBodyType::Station,
            parent_id: Some(planet_ids[1]),
            mass: 10.0,
            radius: 50.0,
            orbit: Orbit {
                semi_major: 4_000.0,
                eccentricity: 0.0,
                inclination: 0.0,
                period: 120.0,
                phase: 0.0,
            },
            color: "#dddddd".to_string(),
            cached_position: Vector3::ZERO,
            cached_velocity: Vector3::ZERO,
            orbit_progress: 0.0,
        });
        info!("Seeded default system: {} bodies", self.body_count());
    }
}

/// Solve Kepler's equation M = E - e sin E by Newton iteration.
fn eccentric_anomaly(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut e_anom = if eccentricity > 0.8 {
        std::f64::consts::PI
    } else {
        mean_anomaly
    };
    for _ in 0..KEPLER_MAX_ITERATIONS {
        let f = e_anom - eccentricity * e_anom.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * e_anom.cos();
        let step = f / f_prime;
        e_anom -= step;
        if step.abs() < KEPLER_TOLERANCE {
            break;
        }
    }
    e_anom
}

/// Position, velocity and orbit progress for an orbit around a parent at
/// `parent_pos`/`parent_vel`, at the given simulation time.
fn orbital_state(
    orbit: &Orbit,
    sim_time: f64,
    parent_pos: &Vector3,
    parent_vel: &Vector3,
) -> (Vector3, Vector3, f32) {
    let mean_anomaly = (TAU * sim_time / orbit.period + orbit.phase).rem_euclid(TAU);
    let e_anom = eccentric_anomaly(mean_anomaly, orbit.eccentricity);
    let e = orbit.eccentricity;
    let a = orbit.semi_major;

    // orbital-plane position
    let x = a * (e_anom.cos() - e);
    let y = a * (1.0 - e * e).sqrt() * e_anom.sin();

    // orbital-plane velocity (d/dt of the above, in sim seconds)
    let mean_motion = TAU / orbit.period;
    let e_dot = mean_motion / (1.0 - e * e_anom.cos());
    let vx = -a * e_anom.sin() * e_dot;
    let vy = a * (1.0 - e * e).sqrt() * e_anom.cos() * e_dot;

    // rotate by inclination about the X axis, then translate into the
    // parent frame
    let (sin_i, cos_i) = orbit.inclination.sin_cos();
    let position = Vector3::new(
        x as f32,
        (y * cos_i) as f32,
        (y * sin_i) as f32,
    )
    .add(parent_pos);
    let velocity = Vector3::new(
        vx as f32,
        (vy * cos_i) as f32,
        (vy * sin_i) as f32,
    )
    .add(parent_vel);

    (position, velocity, (mean_anomaly / TAU) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: u32, parent: Option<u32>, period: f64, phase: f64) -> CelestialBody {
        CelestialBody {
            id,
            name: format!("body-{}", id),
            body_type: if parent.is_none() {
                CelestialBodyType::Star
            } else {
                CelestialBodyType::Planet
            },
            parent_id: parent,
            mass: 1.0,
            radius: 100.0,
            orbit: Orbit {
                semi_major: 10_000.0,
                eccentricity: 0.1,
                inclination: 0.0,
                period,
                phase,
            },
            color: "#ffffff".to_string(),
            cached_position: Vector3::ZERO,
            cached_velocity: Vector3::ZERO,
            orbit_progress: 0.0,
        }
    }

    #[test]
    fn test_orbit_progress_half_period() {
        let sim = CelestialSimulator::new(1.0);
        sim.add_body(body(1, None, 1.0, 0.0));
        sim.add_body(body(2, Some(1), 100.0, 0.0));
        sim.advance(50.0);
        let progress = sim.get_body(2).unwrap().orbit_progress;
        assert!((progress - 0.5).abs() < 1e-4, "progress = {}", progress);
    }

    #[test]
    fn test_position_is_periodic() {
        let sim = CelestialSimulator::new(1.0);
        sim.add_body(body(1, None, 1.0, 0.0));
        sim.add_body(body(2, Some(1), 100.0, 0.3));
        sim.advance(13.0);
        let p0 = sim.get_body(2).unwrap().cached_position;
        sim.advance(100.0);
        let p1 = sim.get_body(2).unwrap().cached_position;
        let scale = p0.length().max(1.0);
        assert!(p0.distance(&p1) / scale < 1e-2, "{:?} vs {:?}", p0, p1);
    }

    #[test]
    fn test_determinism_same_time_same_position() {
        let a = CelestialSimulator::new(1.0);
        let b = CelestialSimulator::new(1.0);
        for sim in [&a, &b] {
            sim.add_body(body(1, None, 1.0, 0.0));
            sim.add_body(body(2, Some(1), 500.0, 1.1));
        }
        a.advance(77.0);
        b.advance(40.0);
        b.advance(37.0);
        let pa = a.get_body(2).unwrap().cached_position;
        let pb = b.get_body(2).unwrap().cached_position;
        assert!(pa.distance(&pb) < 1e-3);
    }

    #[test]
    fn test_speed_bounds_progress_monotonic() {
        for speed in [0.1, 1000.0] {
            let sim = CelestialSimulator::new(speed);
            assert_eq!(sim.simulation_speed(), speed);
            sim.add_body(body(1, None, 1.0, 0.0));
            sim.add_body(body(2, Some(1), 1.0e7, 0.0));
            let mut last = -1.0f32;
            for _ in 0..5 {
                sim.advance(1.0);
                let progress = sim.get_body(2).unwrap().orbit_progress;
                assert!(progress > last);
                assert!((0.0..1.0).contains(&progress));
                last = progress;
            }
        }
    }

    #[test]
    fn test_speed_clamped() {
        let sim = CelestialSimulator::new(1.0);
        assert_eq!(sim.set_simulation_speed(0.0001), MIN_SIMULATION_SPEED);
        assert_eq!(sim.set_simulation_speed(1.0e9), MAX_SIMULATION_SPEED);
    }

    #[test]
    fn test_moon_follows_planet() {
        let sim = CelestialSimulator::new(1.0);
        sim.add_body(body(1, None, 1.0, 0.0));
        sim.add_body(body(2, Some(1), 1000.0, 0.0));
        sim.add_body(body(3, Some(2), 50.0, 0.0));
        sim.advance(123.0);
        let planet = sim.get_body(2).unwrap().cached_position;
        let moon = sim.get_body(3).unwrap().cached_position;
        // moon stays within its orbit diameter of the planet
        assert!(moon.distance(&planet) <= 10_000.0 * (1.0 + 0.1) + 1.0);
    }

    #[test]
    fn test_root_stays_fixed() {
        let sim = CelestialSimulator::new(10.0);
        let mut star = body(1, None, 1.0, 0.0);
        star.cached_position = Vector3::new(5.0, 6.0, 7.0);
        sim.add_body(star);
        sim.advance(1000.0);
        assert_eq!(
            sim.get_body(1).unwrap().cached_position,
            Vector3::new(5.0, 6.0, 7.0)
        );
    }

    #[test]
    fn test_frozen_clock_holds() {
        let sim = CelestialSimulator::new(1.0);
        sim.add_body(body(1, None, 1.0, 0.0));
        sim.add_body(body(2, Some(1), 100.0, 0.0));
        sim.advance(10.0);
        let before = sim.get_body(2).unwrap().cached_position;
        sim.freeze(true);
        sim.advance(10.0);
        assert_eq!(sim.get_body(2).unwrap().cached_position, before);
        sim.freeze(false);
        sim.advance(10.0);
        assert!(sim.get_body(2).unwrap().cached_position.distance(&before) > 0.0);
    }
}
