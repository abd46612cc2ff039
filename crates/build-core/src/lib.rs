pub mod crds;
pub mod determiners;
pub mod error;
pub mod formatters;
pub mod implementations;
pub mod models;
pub mod schemas;
