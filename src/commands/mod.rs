mod down;
mod identity;
mod routes;
mod status;
mod up;
mod validate;

pub use down::run_down;
pub use identity::run_identity;
pub use routes::run_routes;
pub use status::run_status;
pub use up::run_up;
pub use validate::run_validate;
