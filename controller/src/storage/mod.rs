//! Local storage: settings file and workspace layout

pub mod layout;
pub mod settings;
