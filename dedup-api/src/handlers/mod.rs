mod accept;
mod app;

pub use app::{add_routes, AppState};
