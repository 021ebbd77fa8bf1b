pub mod prompt;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio;
use crate::llm::{CompletionParams, LlmProvider};
use crate::store::StudyStore;
use crate::store::types::{
    AffectSnapshot, Agent, AudioFeatures, ConversationMetadata, NewMessage, Role, StoredMessage,
};

const TOKEN_LIMIT: usize = 4096;
const CHARS_PER_TOKEN: usize = 4;

/// Outcomes a turn can fail with. The web layer maps these onto the HTTP
/// contract the client expects.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Messages Limit Exceeded")]
    MessageLimitExceeded,
    #[error("Conversations Limit Exceeded")]
    ConversationLimitExceeded,
    #[error("Message Is Too Long")]
    MessageTooLong,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of one spoken turn: the saved assistant message plus its
/// synthesized audio.
pub struct AudioTurnOutcome {
    pub message: StoredMessage,
    pub speech_mp3: Vec<u8>,
}

/// Runs the whole lifecycle of a conversation turn against the store and the
/// model backend.
pub struct TurnEngine {
    store: Arc<StudyStore>,
    llm: Arc<dyn LlmProvider>,
}

impl TurnEngine {
    pub fn new(store: Arc<StudyStore>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { store, llm }
    }

    /// Text turn. When `chunks` is given the completion is streamed and each
    /// delta forwarded; either way the saved assistant message is returned.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        message: NewMessage,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<StoredMessage, TurnError> {
        self.complete_turn(conversation_id, message, AudioFeatures::default(), chunks)
            .await
    }

    /// Spoken turn: transcode, measure, transcribe, then run the text
    /// pipeline with the acoustic features attached, and voice the reply.
    pub async fn run_audio_turn(
        &self,
        conversation_id: &str,
        raw_audio: &[u8],
    ) -> Result<AudioTurnOutcome, TurnError> {
        let (wav, features) = audio::process_audio(raw_audio).await;
        let text = self
            .llm
            .transcribe(wav)
            .await
            .context("transcribe audio turn")?;
        info!(
            pitch = features.pitch,
            loudness = features.loudness,
            snr = features.snr,
            "audio turn features"
        );

        let message = NewMessage {
            role: Role::User,
            content: text,
            time_delay: None,
        };
        let saved = self
            .complete_turn(conversation_id, message, features, None)
            .await?;
        let speech_mp3 = self
            .llm
            .synthesize(&saved.content)
            .await
            .context("synthesize assistant reply")?;
        Ok(AudioTurnOutcome {
            message: saved,
            speech_mp3,
        })
    }

    async fn complete_turn(
        &self,
        conversation_id: &str,
        message: NewMessage,
        features: AudioFeatures,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<StoredMessage, TurnError> {
        let (history, metadata) = tokio::try_join!(
            self.store.conversation_messages(conversation_id),
            self.store.get_metadata(conversation_id),
        )?;
        let metadata = metadata
            .ok_or_else(|| anyhow!("conversation {conversation_id} not found"))?;

        if let Some(max) = metadata.max_messages {
            if metadata.messages_number + 1 > max {
                return Err(TurnError::MessageLimitExceeded);
            }
        }
        validate_length(&message.content)?;

        let agent = &metadata.agent;
        let affect = if agent.affect_enabled() {
            self.store.consume_current_state(conversation_id).await?
        } else {
            AffectSnapshot::default()
        };

        let outgoing = if agent.affect_enabled() {
            prompt::affect_rewrite(affect.valence, affect.arousal, &message.content)
        } else {
            message.content.clone()
        };
        let messages = prompt::turn_prompt(agent, &history, &outgoing);
        let params = CompletionParams::from_agent(agent);

        // The rewritten content is what the model saw, so it is what the
        // transcript keeps; the raw words survive in the explainable row.
        let user_number = history.len() as u32 + 1;
        self.store
            .append_message(
                conversation_id,
                NewMessage {
                    role: message.role,
                    content: outgoing,
                    time_delay: message.time_delay,
                },
                user_number,
                affect,
                features,
            )
            .await?;

        let reply = match chunks {
            Some(tx) => self.llm.complete_streaming(&params, &messages, tx).await?,
            None => self.llm.complete(&params, &messages).await?,
        };
        let saved = self
            .store
            .append_message(
                conversation_id,
                NewMessage {
                    role: Role::Assistant,
                    content: reply.trim().to_string(),
                    time_delay: agent.inverse_time_delay,
                },
                user_number + 1,
                affect,
                features,
            )
            .await?;

        self.store
            .bump_after_turn(conversation_id, metadata.messages_number + 1)
            .await?;

        if agent.affect_enabled() {
            if let Err(e) = self
                .explain_turn(conversation_id, &metadata, &history, &message, affect)
                .await
            {
                warn!("explainability completion failed: {e:#}");
            }
        }
        Ok(saved)
    }

    /// Side-completion asking the model what the affect values imply. Logged
    /// next to the assistant message it accompanies.
    async fn explain_turn(
        &self,
        conversation_id: &str,
        metadata: &ConversationMetadata,
        history: &[StoredMessage],
        original: &NewMessage,
        affect: AffectSnapshot,
    ) -> anyhow::Result<()> {
        let question = prompt::explain_question(affect.valence, affect.arousal);
        let messages = prompt::explain_prompt(history, &question);
        let params = CompletionParams::from_agent(&metadata.agent);
        let explanation = self.llm.complete(&params, &messages).await?;

        self.store
            .append_explainable(
                conversation_id,
                history.len() as u32 + 2,
                &original.content,
                &question,
                explanation.trim(),
                affect.valence,
                affect.arousal,
            )
            .await?;
        Ok(())
    }

    /// Start a new conversation for a user: enforce the experiment's
    /// conversation cap, freeze the agent condition, seed the opening
    /// message, and advance the session counters.
    pub async fn create_conversation(
        &self,
        user_id: &str,
    ) -> Result<ConversationMetadata, TurnError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| anyhow!("user {user_id} not found"))?;
        let experiment = self
            .store
            .get_experiment(&user.experiment_id)
            .await?
            .ok_or_else(|| anyhow!("experiment {} not found", user.experiment_id))?;

        if !user.is_admin {
            if let Some(max) = experiment.max_conversations {
                if user.number_of_conversations + 1 > max {
                    return Err(TurnError::ConversationLimitExceeded);
                }
            }
        }

        // Admins chat against the experiment's currently active condition;
        // participants keep the condition frozen at registration.
        let agent: Agent = if user.is_admin {
            let active_id = experiment
                .active_agent_id
                .as_deref()
                .ok_or_else(|| anyhow!("experiment {} has no active agent", experiment.id))?;
            self.store
                .get_agent(active_id)
                .await?
                .ok_or_else(|| anyhow!("active agent {active_id} not found"))?
        } else {
            user.agent
                .clone()
                .ok_or_else(|| anyhow!("user {user_id} has no assigned agent"))?
        };

        let max_messages = if user.is_admin {
            None
        } else {
            experiment.max_messages
        };
        let metadata = self
            .store
            .create_conversation_metadata(
                &experiment.id,
                user_id,
                user.number_of_conversations + 1,
                &agent,
                max_messages,
            )
            .await?;

        self.store
            .append_message(
                &metadata.id,
                NewMessage {
                    role: Role::Assistant,
                    content: agent.first_chat_sentence.clone(),
                    time_delay: None,
                },
                1,
                AffectSnapshot::default(),
                AudioFeatures::default(),
            )
            .await?;
        self.store.increment_user_conversations(user_id).await?;
        if !user.is_admin {
            self.store.add_session(&experiment.id).await?;
        }
        Ok(metadata)
    }

    /// Close out a conversation. The experiment's open-session counter drops
    /// only on the first finish of a participant conversation.
    pub async fn finish_conversation(
        &self,
        conversation_id: &str,
        experiment_id: &str,
        is_admin: bool,
    ) -> Result<(), TurnError> {
        let newly_finished = self.store.finish_conversation(conversation_id).await?;
        if newly_finished && !is_admin {
            self.store.close_session(experiment_id).await?;
        }
        Ok(())
    }
}

fn validate_length(content: &str) -> Result<(), TurnError> {
    let estimated_tokens = content.len().div_ceil(CHARS_PER_TOKEN);
    if estimated_tokens > TOKEN_LIMIT {
        return Err(TurnError::MessageTooLong);
    }
    Ok(())
}
