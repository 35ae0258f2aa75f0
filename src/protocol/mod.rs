pub mod wire;

use crate::models::{Quaternion, Vector3};
use strum::Display;
pub use wire::DecodeError;
use wire::{ByteReader, ByteWriter};

/// Wire message type byte. All frames lead with one of these after the
/// length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum MessageType {
    ClientConnect = 1,
    ServerAccept = 2,
    ServerReject = 3,
    ClientDisconnect = 4,
    ClientPing = 5,
    ServerPong = 6,
    ClientStateUpdate = 7,
    ServerStateUpdate = 8,
    ServerNpcUpdate = 9,
    ServerCelestialUpdate = 10,
    ServerAoiUpdate = 11,
    ClientReliableAck = 12,
    ServerReliableAck = 13,
}

impl MessageType {
    fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            1 => Ok(MessageType::ClientConnect),
            2 => Ok(MessageType::ServerAccept),
            3 => Ok(MessageType::ServerReject),
            4 => Ok(MessageType::ClientDisconnect),
            5 => Ok(MessageType::ClientPing),
            6 => Ok(MessageType::ServerPong),
            7 => Ok(MessageType::ClientStateUpdate),
            8 => Ok(MessageType::ServerStateUpdate),
            9 => Ok(MessageType::ServerNpcUpdate),
            10 => Ok(MessageType::ServerCelestialUpdate),
            11 => Ok(MessageType::ServerAoiUpdate),
            12 => Ok(MessageType::ClientReliableAck),
            13 => Ok(MessageType::ServerReliableAck),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

/// Fixed frame header following the length prefix:
/// `message_type: u8, sequence: u32, timestamp_ms: u64, client_id: string`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameHeader {
    pub sequence: u32,
    pub timestamp_ms: u64,
    pub client_id: String,
}

/// Per-entity payload inside SERVER_STATE_UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub entity_id: String,
    pub entity_type: String,
    pub position: Vector3,
    pub velocity: Vector3,
    pub rotation: Quaternion,
}

/// Entity payload extended with NPC fields for SERVER_NPC_UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct NpcState {
    pub entity: EntityState,
    pub npc_type: String,
    pub status: String,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CelestialState {
    pub id: u32,
    pub radius: f32,
    pub mass: f32,
    pub orbit_progress: f32,
    pub reserved: [f32; 2],
    pub name: String,
    pub body_type: String,
    pub color: String,
    pub position: Vector3,
    pub velocity: Vector3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AoiState {
    pub id: String,
    pub name: String,
    pub center: Vector3,
    pub radius: f32,
    pub player_count: u16,
    pub npc_count: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    ClientConnect {
        username: String,
        version: String,
    },
    ServerAccept {
        assigned_client_id: String,
        server_time: u64,
        initial_position: Vector3,
        initial_velocity: Vector3,
        initial_rotation: Quaternion,
    },
    ServerReject {
        reason: String,
    },
    ClientDisconnect {
        reason: String,
    },
    ClientPing {
        ping_id: u32,
    },
    ServerPong {
        ping_id: u32,
    },
    ClientStateUpdate {
        position: Vector3,
        velocity: Vector3,
        rotation: Quaternion,
        input_sequence: u32,
    },
    ServerStateUpdate {
        entities: Vec<EntityState>,
        aoi_id: String,
        server_time: u64,
    },
    ServerNpcUpdate {
        npcs: Vec<NpcState>,
    },
    ServerCelestialUpdate {
        bodies: Vec<CelestialState>,
        simulation_time: f64,
    },
    ServerAoiUpdate {
        areas: Vec<AoiState>,
        current_aoi_id: String,
    },
    ClientReliableAck {
        ack_sequence: u32,
    },
    ServerReliableAck {
        ack_sequence: u32,
    },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::ClientConnect { .. } => MessageType::ClientConnect,
            Payload::ServerAccept { .. } => MessageType::ServerAccept,
            Payload::ServerReject { .. } => MessageType::ServerReject,
            Payload::ClientDisconnect { .. } => MessageType::ClientDisconnect,
            Payload::ClientPing { .. } => MessageType::ClientPing,
            Payload::ServerPong { .. } => MessageType::ServerPong,
            Payload::ClientStateUpdate { .. } => MessageType::ClientStateUpdate,
            Payload::ServerStateUpdate { .. } => MessageType::ServerStateUpdate,
            Payload::ServerNpcUpdate { .. } => MessageType::ServerNpcUpdate,
            Payload::ServerCelestialUpdate { .. } => MessageType::ServerCelestialUpdate,
            Payload::ServerAoiUpdate { .. } => MessageType::ServerAoiUpdate,
            Payload::ClientReliableAck { .. } => MessageType::ClientReliableAck,
            Payload::ServerReliableAck { .. } => MessageType::ServerReliableAck,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Payload,
}

/// Serialize a frame: u32 length prefix (header + payload bytes), then
/// the header, then the typed payload. Infallible for well-formed values.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(64);
    w.put_u8(frame.payload.message_type() as u8);
    w.put_u32(frame.header.sequence);
    w.put_u64(frame.header.timestamp_ms);
    w.put_string(&frame.header.client_id);
    encode_payload(&mut w, &frame.payload);

    let body = w.into_bytes();
    let mut out = ByteWriter::with_capacity(body.len() + 4);
    out.put_u32(body.len() as u32);
    let mut out = out.into_bytes();
    out.extend_from_slice(&body);
    out
}

fn encode_payload(w: &mut ByteWriter, payload: &Payload) {
    match payload {
        Payload::ClientConnect { username, version } => {
            w.put_string(username);
            w.put_string(version);
        }
        Payload::ServerAccept {
            assigned_client_id,
            server_time,
            initial_position,
            initial_velocity,
            initial_rotation,
        } => {
            w.put_string(assigned_client_id);
            w.put_u64(*server_time);
            w.put_vector3(initial_position);
            w.put_vector3(initial_velocity);
            w.put_quaternion(initial_rotation);
        }
        Payload::ServerReject { reason } | Payload::ClientDisconnect { reason } => {
            w.put_string(reason);
        }
        Payload::ClientPing { ping_id } | Payload::ServerPong { ping_id } => {
            w.put_u32(*ping_id);
        }
        Payload::ClientStateUpdate {
            position,
            velocity,
            rotation,
            input_sequence,
        } => {
            w.put_vector3(position);
            w.put_vector3(velocity);
            w.put_quaternion(rotation);
            w.put_u32(*input_sequence);
        }
        Payload::ServerStateUpdate {
            entities,
            aoi_id,
            server_time,
        } => {
            w.put_u16(entities.len() as u16);
            for entity in entities {
                encode_entity(w, entity);
            }
            w.put_string(aoi_id);
            w.put_u64(*server_time);
        }
        Payload::ServerNpcUpdate { npcs } => {
            w.put_u16(npcs.len() as u16);
            for npc in npcs {
                encode_entity(w, &npc.entity);
                w.put_string(&npc.npc_type);
                w.put_string(&npc.status);
                w.put_opt_string(&npc.target_id);
            }
        }
        Payload::ServerCelestialUpdate {
            bodies,
            simulation_time,
        } => {
            w.put_u16(bodies.len() as u16);
            for body in bodies {
                w.put_u32(body.id);
                w.put_f32(body.radius);
                w.put_f32(body.mass);
                w.put_f32(body.orbit_progress);
                w.put_f32(body.reserved[0]);
                w.put_f32(body.reserved[1]);
                w.put_string(&body.name);
                w.put_string(&body.body_type);
                w.put_string(&body.color);
                w.put_vector3(&body.position);
                w.put_vector3(&body.velocity);
            }
            w.put_f64(*simulation_time);
        }
        Payload::ServerAoiUpdate {
            areas,
            current_aoi_id,
        } => {
            w.put_u16(areas.len() as u16);
            for area in areas {
                w.put_string(&area.id);
                w.put_string(&area.name);
                w.put_vector3(&area.center);
                w.put_f32(area.radius);
                w.put_u16(area.player_count);
                w.put_u16(area.npc_count);
            }
            w.put_string(current_aoi_id);
        }
        Payload::ClientReliableAck { ack_sequence }
        | Payload::ServerReliableAck { ack_sequence } => {
            w.put_u32(*ack_sequence);
        }
    }
}

fn encode_entity(w: &mut ByteWriter, entity: &EntityState) {
    w.put_string(&entity.entity_id);
    w.put_string(&entity.entity_type);
    w.put_vector3(&entity.position);
    w.put_vector3(&entity.velocity);
    w.put_quaternion(&entity.rotation);
}

/// Decode one frame from `buf`. The reader is bounded to the declared
/// frame length, so a lying length prefix can never read neighbouring
/// bytes.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    let mut prefix = ByteReader::new(buf);
    let declared = prefix.get_u32()? as usize;
    if buf.len() < 4 + declared {
        return Err(DecodeError::TruncatedFrame {
            offset: 4,
            needed: declared,
        });
    }
    let mut r = ByteReader::new(&buf[4..4 + declared]);

    let message_type = MessageType::from_u8(r.get_u8()?)?;
    let header = FrameHeader {
        sequence: r.get_u32()?,
        timestamp_ms: r.get_u64()?,
        client_id: r.get_string()?,
    };
    let payload = decode_payload(&mut r, message_type)?;
    Ok(Frame { header, payload })
}

fn decode_payload(r: &mut ByteReader, message_type: MessageType) -> Result<Payload, DecodeError> {
    let payload = match message_type {
        MessageType::ClientConnect => Payload::ClientConnect {
            username: r.get_string()?,
            version: r.get_string()?,
        },
        MessageType::ServerAccept => Payload::ServerAccept {
            assigned_client_id: r.get_string()?,
            server_time: r.get_u64()?,
            initial_position: r.get_vector3()?,
            initial_velocity: r.get_vector3()?,
            initial_rotation: r.get_quaternion()?,
        },
        MessageType::ServerReject => Payload::ServerReject {
            reason: r.get_string()?,
        },
        MessageType::ClientDisconnect => Payload::ClientDisconnect {
            reason: r.get_string()?,
        },
        MessageType::ClientPing => Payload::ClientPing {
            ping_id: r.get_u32()?,
        },
        MessageType::ServerPong => Payload::ServerPong {
            ping_id: r.get_u32()?,
        },
        MessageType::ClientStateUpdate => Payload::ClientStateUpdate {
            position: r.get_vector3()?,
            velocity: r.get_vector3()?,
            rotation: r.get_quaternion()?,
            input_sequence: r.get_u32()?,
        },
        MessageType::ServerStateUpdate => {
            let count = r.get_u16()?;
            let mut entities = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entities.push(decode_entity(r)?);
            }
            Payload::ServerStateUpdate {
                entities,
                aoi_id: r.get_string()?,
                server_time: r.get_u64()?,
            }
        }
        MessageType::ServerNpcUpdate => {
            let count = r.get_u16()?;
            let mut npcs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                npcs.push(NpcState {
                    entity: decode_entity(r)?,
                    npc_type: r.get_string()?,
                    status: r.get_string()?,
                    target_id: r.get_opt_string()?,
                });
            }
            Payload::ServerNpcUpdate { npcs }
        }
        MessageType::ServerCelestialUpdate => {
            let count = r.get_u16()?;
            let mut bodies = Vec::with_capacity(count as usize);
            for _ in 0..count {
                bodies.push(CelestialState {
                    id: r.get_u32()?,
                    radius: r.get_f32()?,
                    mass: r.get_f32()?,
                    orbit_progress: r.get_f32()?,
                    reserved: [r.get_f32()?, r.get_f32()?],
                    name: r.get_string()?,
                    body_type: r.get_string()?,
                    color: r.get_string()?,
                    position: r.get_vector3()?,
                    velocity: r.get_vector3()?,
                });
            }
            Payload::ServerCelestialUpdate {
                bodies,
                simulation_time: r.get_f64()?,
            }
        }
        MessageType::ServerAoiUpdate => {
            let count = r.get_u16()?;
            let mut areas = Vec::with_capacity(count as usize);
            for _ in 0..count {
                areas.push(AoiState {
                    id: r.get_string()?,
                    name: r.get_string()?,
                    center: r.get_vector3()?,
                    radius: r.get_f32()?,
                    player_count: r.get_u16()?,
                    npc_count: r.get_u16()?,
                });
            }
            Payload::ServerAoiUpdate {
                areas,
                current_aoi_id: r.get_string()?,
            }
        }
        MessageType::ClientReliableAck => Payload::ClientReliableAck {
            ack_sequence: r.get_u32()?,
        },
        MessageType::ServerReliableAck => Payload::ServerReliableAck {
            ack_sequence: r.get_u32()?,
        },
    };
    Ok(payload)
}

fn decode_entity(r: &mut ByteReader) -> Result<EntityState, DecodeError> {
    Ok(EntityState {
        entity_id: r.get_string()?,
        entity_type: r.get_string()?,
        position: r.get_vector3()?,
        velocity: r.get_vector3()?,
        rotation: r.get_quaternion()?,
    })
}
