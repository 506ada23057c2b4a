pub mod id;
pub mod model;
pub mod protocol;
pub mod snowflake;

pub use snowflake::SnowflakeGenerator;
