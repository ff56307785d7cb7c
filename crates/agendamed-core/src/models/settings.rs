use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Default UI language of the client
const DEFAULT_LANGUAGE: &str = "pt-BR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub notifications: bool,
    pub auto_backup: bool,
    pub theme: Theme,
    pub language: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            notifications: true,
            auto_backup: false,
            theme: Theme::Light,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(settings.theme, Theme::Dark);
        assert!(settings.notifications);
        assert!(!settings.auto_backup);
        assert_eq!(settings.language, "pt-BR");
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(AppSettings::default()).unwrap();
        assert_eq!(json["autoBackup"], false);
        assert_eq!(json["theme"], "light");
    }
}
