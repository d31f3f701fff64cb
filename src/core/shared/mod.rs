pub mod state;
#[cfg(test)]
pub mod test_utils;

pub use state::{create_backend, AppState};
