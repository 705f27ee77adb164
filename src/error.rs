use thiserror::Error;

/// Errors raised by the distance-field engine.
///
/// Construction-time variants (`NoAdapter`, `RequestDevice`,
/// `InvalidConfig`) are fatal: the component refuses to exist rather than
/// degrade silently. `NotInitialized` and `EmptyPointCloud` flag caller
/// programming errors loudly. Transient input absence (a frame with no
/// depth points) is not an error at all and never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no suitable GPU adapter available")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("update called before initialize uploaded a target mesh")]
    NotInitialized,

    #[error("bounds reduction requires at least one point")]
    EmptyPointCloud,

    #[error("malformed target mesh: {0}")]
    InvalidMesh(String),

    #[error("volume box has zero or negative size on at least one axis")]
    DegenerateBox,

    #[error("GPU readback failed: {0}")]
    BufferMap(String),
}

pub type Result<T> = std::result::Result<T, Error>;
