// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

#[macro_use]
pub mod utils;

pub mod designs;
pub mod properties;
pub mod scenario;

pub use utils::*;
