pub mod state;

pub use state::{
    ReconnectSettings, ScrollSettings, Settings, SettingsOverrides, default_config_path,
};
