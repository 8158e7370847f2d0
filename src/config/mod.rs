mod settings;

pub use settings::{
    DirectoryConfig, Settings, SlackConfig, load_settings, load_settings_from,
};
