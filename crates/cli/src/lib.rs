//! Command line front end for installing and talking to the bless helper.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod helper;
pub mod logging;
pub mod output;
pub mod prompt;
