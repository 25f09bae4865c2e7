pub mod connection;
pub mod error;
pub mod ids;
pub mod result;

pub use connection::*;
pub use error::*;
pub use ids::*;
pub use result::*;
