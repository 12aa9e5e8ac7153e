//! Error taxonomy for the playback core.
//!
//! Glue code (serenity handlers, storage, config) keeps using `anyhow`;
//! the scheduler and the transport controller return [`PlayerError`] so
//! handlers can tell recoverable user mistakes apart from real failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// The extraction service returned nothing playable.
    #[error("No se pudo resolver «{query}»: {reason}")]
    Resolution { query: String, reason: String },

    /// The acting user is not in the bot's voice channel.
    #[error("El usuario no está en el mismo canal de voz que el bot")]
    Authorization,

    /// 1-based queue index outside `[1, len]`.
    #[error("Posición {index} fuera de rango (la cola tiene {len} canciones)")]
    OutOfRange { index: usize, len: usize },

    /// The audio sink failed to start or broke mid-stream.
    #[error("Error de transporte de audio: {0}")]
    Transport(String),

    #[error("El bot no está conectado a un canal de voz")]
    NotConnected,

    /// The acting user is not in any voice channel.
    #[error("El usuario no está en ningún canal de voz")]
    NotInVoice,

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),
}

impl PlayerError {
    pub fn resolution(query: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolution {
            query: query.into(),
            reason: reason.to_string(),
        }
    }

    /// Text shown to the user in the invoking channel.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authorization => "❌ ¡Debes estar en el mismo canal de voz que el bot!".to_string(),
            Self::OutOfRange { len, .. } if *len == 0 => "📭 ¡La cola está vacía!".to_string(),
            Self::OutOfRange { index, len } => {
                format!("❌ Posición inválida: {}. Usa un número entre 1 y {}", index, len)
            }
            Self::NothingPlaying => "❌ No hay nada reproduciéndose actualmente".to_string(),
            Self::NotInVoice => "❌ ¡Debes estar en un canal de voz!".to_string(),
            other => format!("❌ {}", other),
        }
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
