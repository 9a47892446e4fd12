// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено (если не задан RUST_LOG)

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
    // Уровень по умолчанию, если RUST_LOG не задан
    pub const DEFAULT_FILTER: &str = "ssc_call_lib=debug,webrtc=warn";
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
    pub const DEFAULT_FILTER: &str = "ssc_call_lib=info,webrtc=error";
}

/// Параметры обработки звука, которые передаются бэкенду захвата
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Настройки звонка
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct CallConfig {
    /// Сколько ждём answerResponse в состоянии Dialing
    pub answer_timeout_secs: u64,
    /// Сколько Negotiating может ждать Connected
    pub ice_timeout_secs: u64,
    /// Период ожидания восстановления после Disconnected
    pub grace_period_secs: u64,
    pub ice_servers: Vec<ServerConfig>,
    /// Отправлять ли звонящему отказ, если не удалось получить медиа при accept
    pub notify_on_media_failure: bool,
    pub audio_processing: AudioProcessing,
    pub signaling_url: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            answer_timeout_secs: 30,
            ice_timeout_secs: 20,
            grace_period_secs: 10,
            ice_servers: default_ice_servers(),
            notify_on_media_failure: false,
            audio_processing: AudioProcessing::default(),
            signaling_url: None,
        }
    }
}

impl CallConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_secs(self.answer_timeout_secs)
    }

    pub fn ice_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Валидация серверов: пустой URL и TURN без логина/пароля недопустимы
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::EmptyUrl(server.id.clone()));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
            }
        }
        Ok(())
    }
}

/// Дефолтные серверы в формате ServerConfig
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
