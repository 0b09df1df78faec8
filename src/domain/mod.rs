pub mod model;
pub mod params;
pub mod path;
pub mod populate;
pub mod projection;

/// A stored record: field name to value. The primary key lives in one of the
/// fields, named by the owning service.
pub type Entity = serde_json::Map<String, serde_json::Value>;
