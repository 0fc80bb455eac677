//! Provider family adapters.

mod cinematic;
mod clip;
mod presenter;

pub use cinematic::CinematicAdapter;
pub use clip::ClipAdapter;
pub use presenter::PresenterAdapter;

fn is_null(value: &&serde_json::Value) -> bool {
    value.is_null()
}
