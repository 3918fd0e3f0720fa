//! Gemini Live wire messages.
//!
//! Client messages are externally tagged (`{"setup": {...}}`). Server
//! messages are a single object whose populated field says what it is;
//! [`parse_server_message`] maps each one to exactly one [`InboundEvent`].

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::realtime::base::{
    FunctionDeclaration, InboundAudioChunk, InboundEvent, OutboundAudioChunk, RawProtocolError,
    ToolCallRequest, ToolCallResponse, TranscriptionSource,
};
use crate::errors::ProtocolParseError;

use super::config::{LiveConnectConfig, normalize_model};

// =============================================================================
// Client -> server
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Build the setup message for `model` and `config`.
    pub fn setup(model: &str, config: &LiveConnectConfig) -> Self {
        let speech_config = config.voice.as_ref().map(|voice| SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.clone(),
                },
            },
        });

        ClientMessage::Setup(Setup {
            model: normalize_model(model),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config,
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
            tools: vec![ToolSet {
                function_declarations: config.tools.clone(),
            }],
            input_audio_transcription: config.transcribe_input.then(EmptyConfig::default),
            output_audio_transcription: config.transcribe_output.then(EmptyConfig::default),
        })
    }

    pub fn audio(chunk: &OutboundAudioChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type.to_string(),
                data: chunk.data.to_string(),
            }],
        })
    }

    pub fn tool_response(responses: Vec<ToolCallResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }

    /// Log tag for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "client.setup",
            ClientMessage::RealtimeInput(_) => "client.realtimeInput",
            ClientMessage::ToolResponse(_) => "client.toolResponse",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub tools: Vec<ToolSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<EmptyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<EmptyConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Serializes as `{}`; enables a feature without options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<ToolCallResponse>,
}

// =============================================================================
// Shared content
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// =============================================================================
// Server -> client
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

fn protocol_error(error: ProtocolParseError, raw: &str) -> InboundEvent {
    InboundEvent::Error(RawProtocolError {
        error,
        raw: raw.to_string(),
    })
}

/// Map one inbound wire message to exactly one event.
///
/// Within `serverContent` the priority is interrupted, audio, transcription,
/// generation complete, then turn complete.
pub fn parse_server_message(raw: &str) -> InboundEvent {
    let message: ServerMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => return protocol_error(ProtocolParseError::MalformedJson(e.to_string()), raw),
    };

    if message.setup_complete.is_some() {
        return InboundEvent::ConnectionOpened;
    }

    if let Some(tool_call) = message.tool_call {
        let requests = tool_call
            .function_calls
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name: call.name,
                args: call.args.unwrap_or_default(),
            })
            .collect();
        return InboundEvent::ToolCallRequest(requests);
    }

    if let Some(cancellation) = message.tool_call_cancellation {
        return InboundEvent::ToolCallCancellation(cancellation.ids);
    }

    if let Some(content) = message.server_content {
        return match parse_server_content(content) {
            Ok(Some(event)) => event,
            Ok(None) => protocol_error(ProtocolParseError::UnrecognizedMessage, raw),
            Err(e) => protocol_error(e, raw),
        };
    }

    if let Some(go_away) = message.go_away {
        return InboundEvent::GoAway {
            time_left: go_away.time_left,
        };
    }

    if let Some(usage) = message.usage_metadata {
        return InboundEvent::UsageMetadata(usage);
    }

    protocol_error(ProtocolParseError::UnrecognizedMessage, raw)
}

fn parse_server_content(content: ServerContent) -> Result<Option<InboundEvent>, ProtocolParseError> {
    if content.interrupted {
        return Ok(Some(InboundEvent::Interrupted));
    }

    if let Some(turn) = &content.model_turn {
        let mut audio = Vec::new();
        let mut mime_type = None;
        for blob in turn.parts.iter().filter_map(|p| p.inline_data.as_ref()) {
            if !blob.mime_type.starts_with("audio/") {
                continue;
            }
            let bytes = BASE64_STANDARD
                .decode(&blob.data)
                .map_err(|e| ProtocolParseError::InvalidAudio(e.to_string()))?;
            audio.extend_from_slice(&bytes);
            mime_type.get_or_insert_with(|| blob.mime_type.clone());
        }
        if let Some(mime_type) = mime_type {
            return Ok(Some(InboundEvent::AudioChunk(InboundAudioChunk {
                data: Bytes::from(audio),
                mime_type,
            })));
        }
    }

    if let Some(t) = content.input_transcription {
        return Ok(Some(InboundEvent::TranscriptionFragment {
            source: TranscriptionSource::Input,
            text: t.text,
        }));
    }

    if let Some(t) = content.output_transcription {
        return Ok(Some(InboundEvent::TranscriptionFragment {
            source: TranscriptionSource::Output,
            text: t.text,
        }));
    }

    if content.generation_complete && !content.turn_complete {
        return Ok(Some(InboundEvent::GenerationComplete));
    }

    if content.turn_complete {
        return Ok(Some(InboundEvent::TurnComplete));
    }

    Ok(None)
}
