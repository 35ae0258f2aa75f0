use lazy_static::lazy_static;

/// How a runtime change to the default AOI radius is applied to areas that
/// already exist. `Keep` matches the historical behaviour: existing areas
/// are untouched and a warning is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AoiResizePolicy {
    Keep,
    Reregister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    JsonFile,
}

#[derive(Debug)]
pub struct Config {
    pub udp_port: u16,
    pub http_port: u16,
    pub data_dir: String,
    pub store_backend: StoreBackend,
    pub aoi_resize_policy: AoiResizePolicy,
}

lazy_static! {
    pub static ref CONFIG: Config = {
        let udp_port = match std::env::var("UDP_PORT") {
            Ok(val) => val.parse().expect("Invalid UDP_PORT"),
            Err(_) => 7777,
        };
        let http_port = match std::env::var("HTTP_PORT") {
            Ok(val) => val.parse().expect("Invalid HTTP_PORT"),
            Err(_) => 5000,
        };
        let data_dir = std::env::var("DATA_DIR").unwrap_or("data".to_string());
        let store_backend = match std::env::var("STORE_BACKEND").as_deref() {
            Ok("json") => StoreBackend::JsonFile,
            _ => StoreBackend::Memory,
        };
        let aoi_resize_policy = match std::env::var("AOI_RESIZE_POLICY").as_deref() {
            Ok("reregister") => AoiResizePolicy::Reregister,
            _ => AoiResizePolicy::Keep,
        };
        Config {
            udp_port,
            http_port,
            data_dir,
            store_backend,
            aoi_resize_policy,
        }
    };
}
