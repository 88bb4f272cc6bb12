pub mod ids;
pub mod objective;
pub mod parameter;
pub mod stage;
pub mod trial;
