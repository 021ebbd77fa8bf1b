pub mod archive;
pub mod xlsx;

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::store::StudyStore;
use crate::store::types::{
    Agent, ConversationMetadata, ExplainableRecord, StoredMessage, User,
};

/// Everything an experiment produced, grouped the way the workbook lays it
/// out: condition, then participant, then conversation.
pub struct ExperimentExport {
    pub agents_mode: String,
    pub number_of_participants: usize,
    pub agents: Vec<AgentGroup>,
}

pub struct AgentGroup {
    pub condition: Agent,
    pub users: Vec<UserExport>,
}

pub struct UserExport {
    pub user: User,
    pub conversations: Vec<ConversationExport>,
}

pub struct ConversationExport {
    pub metadata: ConversationMetadata,
    pub messages: Vec<StoredMessage>,
    pub explainables: Vec<ExplainableRecord>,
}

/// Pull the full experiment tree out of the store. Participants are grouped
/// by their frozen agent snapshot; admin accounts without a snapshot are
/// not part of the data set.
pub async fn collect_experiment_data(
    store: &StudyStore,
    experiment_id: &str,
) -> Result<ExperimentExport> {
    let experiment = store
        .get_experiment(experiment_id)
        .await?
        .ok_or_else(|| anyhow!("experiment {experiment_id} not found"))?;
    let users = store.users_by_experiment(experiment_id).await?;

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, AgentGroup> = HashMap::new();
    let mut number_of_participants = 0;

    for user in users {
        let Some(agent) = user.agent.clone() else {
            continue;
        };
        number_of_participants += 1;

        let mut conversations = Vec::new();
        for metadata in store.metadata_for_user(&user.id).await? {
            let messages = store.conversation_messages(&metadata.id).await?;
            let explainables = if agent.affect_enabled() {
                store.conversation_explainables(&metadata.id).await?
            } else {
                Vec::new()
            };
            conversations.push(ConversationExport {
                metadata,
                messages,
                explainables,
            });
        }

        let group = groups.entry(agent.id.clone()).or_insert_with(|| {
            order.push(agent.id.clone());
            AgentGroup {
                condition: agent,
                users: Vec::new(),
            }
        });
        group.users.push(UserExport {
            user,
            conversations,
        });
    }

    let agents = order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .collect();
    Ok(ExperimentExport {
        agents_mode: experiment.agents_mode,
        number_of_participants,
        agents,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::collect_experiment_data;
    use crate::conversation::TurnEngine;
    use crate::llm::testing::ScriptedProvider;
    use crate::store::testing::{agent_payload, experiment_payload, temp_store, user_payload};

    #[tokio::test]
    async fn export_groups_participants_by_condition() {
        let (store, _dir) = temp_store().await;
        let store = Arc::new(store);
        let engine = TurnEngine::new(
            store.clone(),
            Arc::new(ScriptedProvider::new(&["Nice to meet you."])),
        );

        let agent_a = store.save_agent(agent_payload("A")).await.unwrap();
        let agent_b = store.save_agent(agent_payload("B")).await.unwrap();
        let experiment = store
            .create_experiment(experiment_payload("E"))
            .await
            .unwrap();

        let alice = store
            .create_user(user_payload(&experiment.id, "alice"), Some(agent_a.clone()))
            .await
            .unwrap();
        store
            .create_user(user_payload(&experiment.id, "bob"), Some(agent_a))
            .await
            .unwrap();
        store
            .create_user(user_payload(&experiment.id, "carol"), Some(agent_b))
            .await
            .unwrap();

        let conversation = engine.create_conversation(&alice.id).await.unwrap();
        engine
            .run_turn(
                &conversation.id,
                crate::store::types::NewMessage {
                    role: crate::store::types::Role::User,
                    content: "hi".to_string(),
                    time_delay: None,
                },
                None,
            )
            .await
            .unwrap();

        let export = collect_experiment_data(&store, &experiment.id)
            .await
            .unwrap();
        assert_eq!(export.number_of_participants, 3);
        assert_eq!(export.agents.len(), 2);
        assert_eq!(export.agents[0].condition.title, "A");
        assert_eq!(export.agents[0].users.len(), 2);
        assert_eq!(export.agents[1].users.len(), 1);

        let alice_export = &export.agents[0].users[0];
        assert_eq!(alice_export.user.username, "alice");
        assert_eq!(alice_export.conversations.len(), 1);
        assert_eq!(alice_export.conversations[0].messages.len(), 3);
    }
}
