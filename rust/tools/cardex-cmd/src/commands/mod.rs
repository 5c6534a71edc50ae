//! Command implementations for cardex-cmd

pub mod build;
pub mod inspect;
