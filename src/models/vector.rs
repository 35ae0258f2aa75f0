use serde::{Deserialize, Serialize};

/// 3-component f32 vector. Plain value type, copied freely.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(&self, other: &Vector3) -> Vector3 {
        Vector3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: &Vector3) -> Vector3 {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(&self, s: f32) -> Vector3 {
        Vector3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn dot(&self, other: &Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(&self) -> Vector3 {
        let len = self.length();
        if len < 1e-9 {
            return Vector3::ZERO;
        }
        self.scale(1.0 / len)
    }

    pub fn distance(&self, other: &Vector3) -> f32 {
        self.sub(other).length()
    }

    /// Clamp the magnitude to `max`, preserving direction.
    pub fn clamp_length(&self, max: f32) -> Vector3 {
        let len = self.length();
        if len > max && len > 0.0 {
            self.scale(max / len)
        } else {
            *self
        }
    }
}

/// Unit quaternion (x, y, z, w). Value type like Vector3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_axis_angle(axis: &Vector3, angle: f32) -> Quaternion {
        let axis = axis.normalize();
        let half = angle * 0.5;
        let s = half.sin();
        Quaternion::new(axis.x * s, axis.y * s, axis.z * s, half.cos()).normalize()
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    pub fn normalize(&self) -> Quaternion {
        let mag = self.magnitude();
        if mag < 1e-9 {
            return Quaternion::IDENTITY;
        }
        Quaternion::new(self.x / mag, self.y / mag, self.z / mag, self.w / mag)
    }

    /// Rotate a vector by this quaternion: v' = v + 2q×(q×v + wv)
    pub fn rotate(&self, v: &Vector3) -> Vector3 {
        let q = Vector3::new(self.x, self.y, self.z);
        let t = q.cross(v).scale(2.0);
        v.add(&t.scale(self.w)).add(&q.cross(&t))
    }
}
