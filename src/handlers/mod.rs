pub mod access;
pub mod commands;
pub mod keyboards;
pub mod media;
pub mod wizard;
