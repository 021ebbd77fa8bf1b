//! Workbook rendering of an experiment export. One sheet per entity level,
//! with child rows hyperlinking back to the owning row of the parent sheet.

use anyhow::Result;
use rust_xlsxwriter::{Url, Workbook, Worksheet};

use super::ExperimentExport;

const MAIN_COLUMNS: &[&str] = &["Agents Mode", "Total Number of Participants"];

const AGENTS_COLUMNS: &[&str] = &[
    "Number of Participants",
    "Condition Title",
    "Summary",
    "System Starter Prompt",
    "Before User Sentence Prompt",
    "After User Sentence Prompt",
    "Inverse time delay",
    "First Chat Sentence",
    "Model",
    "Temperature",
    "Max Tokens",
    "Top P",
    "Frequency Penalty",
    "Presence Penalty",
    "Camera Capture Rate",
    "Valence-Arousal Integration",
    "Stop Sequences",
];

const USERS_COLUMNS: &[&str] = &[
    "Agent",
    "Username",
    "Number of Conversations",
    "Age",
    "Gender",
    "Created At",
];

const CONVERSATIONS_COLUMNS: &[&str] = &[
    "Conversation ID",
    "Agent",
    "User",
    "Conversation Number",
    "Number Of Messages",
    "Created At",
    "Last Message Date",
    "Finished",
];

const MESSAGES_COLUMNS: &[&str] = &[
    "Conversation ID",
    "Message ID",
    "Agent",
    "User",
    "Number of User Conversation",
    "Message Number",
    "Role",
    "User Annotation",
    "Content",
    "Valence",
    "Arousal",
    "Pitch",
    "Loudness",
    "SNR",
    "Created At",
];

const EXPLAINABLE_COLUMNS: &[&str] = &[
    "Conversation ID",
    "user_input",
    "prompt_input",
    "response",
    "Message Number",
    "Role",
    "Valence",
    "Arousal",
    "Created At",
];

const RULE_SHEET_COLUMNS: &[&str] = &[
    "Condition Title",
    "Summary",
    "System Starter Prompt",
    "Before User Sentence Prompt",
    "After User Sentence Prompt",
    "Inverse time delay",
    "First Chat Sentence",
    "Model",
    "Temperature",
    "Max Tokens",
    "Top P",
    "Frequency Penalty",
    "Presence Penalty",
    "Camera Capture Rate",
    "Valence-Arousal Integration",
    "Stop Sequences",
];

/// Rule sheet with one illustrative condition row. Admins download it,
/// author conditions offline, and upload the parsed result.
pub fn sample_rule_sheet() -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet().set_name("Rule Sheet")?;
    write_header(sheet, RULE_SHEET_COLUMNS)?;
    sheet.write(1, 0, "Supportive listener")?;
    sheet.write(1, 1, "Baseline condition")?;
    sheet.write(1, 2, "You are a supportive conversation partner.")?;
    sheet.write(1, 3, "The user says:")?;
    sheet.write(1, 4, "Reply briefly.")?;
    sheet.write(1, 5, 2.0)?;
    sheet.write(1, 6, "Hi, how are you feeling today?")?;
    sheet.write(1, 7, "gpt-4o")?;
    sheet.write(1, 8, 0.7)?;
    sheet.write(1, 9, 256u32)?;
    sheet.write(1, 13, 6.0)?;
    sheet.write(1, 14, true)?;
    sheet.write(1, 15, "END")?;
    Ok(workbook.save_to_buffer()?)
}

/// Render the export to xlsx bytes.
pub fn build_workbook(export: &ExperimentExport) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    workbook.add_worksheet().set_name("Main")?;
    workbook.add_worksheet().set_name("Agents")?;
    workbook.add_worksheet().set_name("Users")?;
    workbook.add_worksheet().set_name("Conversations")?;
    workbook.add_worksheet().set_name("Messages")?;
    workbook.add_worksheet().set_name("Explainable AI")?;

    let (user_extra_keys, survey_keys) = dynamic_columns(export);

    {
        let main = workbook.worksheet_from_name("Main")?;
        write_header(main, MAIN_COLUMNS)?;
        main.write(1, 0, &export.agents_mode)?;
        main.write(1, 1, export.number_of_participants as u32)?;
    }
    {
        let agents = workbook.worksheet_from_name("Agents")?;
        write_header(agents, AGENTS_COLUMNS)?;
    }
    {
        let users = workbook.worksheet_from_name("Users")?;
        write_header(users, USERS_COLUMNS)?;
        for (i, key) in user_extra_keys.iter().enumerate() {
            users.write(0, (USERS_COLUMNS.len() + i) as u16, key)?;
        }
    }
    {
        let conversations = workbook.worksheet_from_name("Conversations")?;
        write_header(conversations, CONVERSATIONS_COLUMNS)?;
        for (i, key) in survey_keys.iter().enumerate() {
            conversations.write(0, (CONVERSATIONS_COLUMNS.len() + i) as u16, key)?;
        }
    }
    write_header(workbook.worksheet_from_name("Messages")?, MESSAGES_COLUMNS)?;
    write_header(
        workbook.worksheet_from_name("Explainable AI")?,
        EXPLAINABLE_COLUMNS,
    )?;

    let mut agent_row = 1u32;
    let mut user_row = 1u32;
    let mut conversation_row = 1u32;
    let mut message_row = 1u32;
    let mut explainable_row = 1u32;

    for group in &export.agents {
        let condition = &group.condition;
        {
            let agents = workbook.worksheet_from_name("Agents")?;
            agents.write(agent_row, 0, group.users.len() as u32)?;
            agents.write(agent_row, 1, &condition.title)?;
            agents.write(agent_row, 2, &condition.summary)?;
            agents.write(agent_row, 3, &condition.system_starter_prompt)?;
            agents.write(agent_row, 4, &condition.before_user_sentence_prompt)?;
            agents.write(agent_row, 5, &condition.after_user_sentence_prompt)?;
            write_opt_number(agents, agent_row, 6, condition.inverse_time_delay)?;
            agents.write(agent_row, 7, &condition.first_chat_sentence)?;
            agents.write(agent_row, 8, &condition.model)?;
            write_opt_number(agents, agent_row, 9, condition.temperature)?;
            write_opt_number(agents, agent_row, 10, condition.max_tokens.map(f64::from))?;
            write_opt_number(agents, agent_row, 11, condition.top_p)?;
            write_opt_number(agents, agent_row, 12, condition.frequency_penalty)?;
            write_opt_number(agents, agent_row, 13, condition.presence_penalty)?;
            write_opt_number(agents, agent_row, 14, condition.camera_capture_rate)?;
            if let Some(vai) = condition.va_integration {
                agents.write(agent_row, 15, vai)?;
            }
            agents.write(agent_row, 16, condition.stop_sequences.join(", "))?;
        }
        let agent_link = Url::new(format!("internal:'Agents'!A{}", agent_row + 1))
            .set_text(&condition.title);

        for user_export in &group.users {
            let user = &user_export.user;
            {
                let users = workbook.worksheet_from_name("Users")?;
                users.write_url(user_row, 0, agent_link.clone())?;
                users.write(user_row, 1, &user.username)?;
                users.write(user_row, 2, user.number_of_conversations)?;
                write_opt_number(users, user_row, 3, user.age.map(f64::from))?;
                users.write(user_row, 4, user.gender.clone().unwrap_or_default())?;
                users.write(user_row, 5, &user.created_at)?;
                if let Some(extra) = user.extra.as_object() {
                    for (i, key) in user_extra_keys.iter().enumerate() {
                        if let Some(value) = extra.get(key) {
                            write_value(
                                users,
                                user_row,
                                (USERS_COLUMNS.len() + i) as u16,
                                value,
                            )?;
                        }
                    }
                }
            }
            let user_link = Url::new(format!("internal:'Users'!A{}", user_row + 1))
                .set_text(&user.username);

            for conversation in &user_export.conversations {
                let metadata = &conversation.metadata;
                {
                    let sheet = workbook.worksheet_from_name("Conversations")?;
                    sheet.write(conversation_row, 0, &metadata.id)?;
                    sheet.write_url(conversation_row, 1, agent_link.clone())?;
                    sheet.write_url(conversation_row, 2, user_link.clone())?;
                    sheet.write(conversation_row, 3, metadata.conversation_number)?;
                    sheet.write(conversation_row, 4, metadata.messages_number)?;
                    sheet.write(conversation_row, 5, &metadata.created_at)?;
                    sheet.write(
                        conversation_row,
                        6,
                        metadata.last_message_date.clone().unwrap_or_default(),
                    )?;
                    sheet.write(conversation_row, 7, metadata.is_finished)?;

                    for (i, key) in survey_keys.iter().enumerate() {
                        let value = survey_value(metadata, key);
                        if let Some(value) = value {
                            write_value(
                                sheet,
                                conversation_row,
                                (CONVERSATIONS_COLUMNS.len() + i) as u16,
                                value,
                            )?;
                        }
                    }
                }
                let conversation_link =
                    Url::new(format!("internal:'Conversations'!A{}", conversation_row + 1))
                        .set_text(&metadata.id);

                let messages = workbook.worksheet_from_name("Messages")?;
                for message in &conversation.messages {
                    messages.write_url(message_row, 0, conversation_link.clone())?;
                    messages.write(message_row, 1, &message.id)?;
                    messages.write_url(message_row, 2, agent_link.clone())?;
                    messages.write_url(message_row, 3, user_link.clone())?;
                    messages.write(message_row, 4, metadata.conversation_number)?;
                    messages.write(message_row, 5, message.message_number)?;
                    messages.write(message_row, 6, message.role.as_str())?;
                    messages.write(message_row, 7, message.user_annotation as f64)?;
                    messages.write(message_row, 8, &message.content)?;
                    messages.write(message_row, 9, message.valence)?;
                    messages.write(message_row, 10, message.arousal)?;
                    messages.write(message_row, 11, message.pitch)?;
                    messages.write(message_row, 12, message.loudness)?;
                    messages.write(message_row, 13, message.snr)?;
                    messages.write(message_row, 14, &message.created_at)?;
                    message_row += 1;
                }

                let explainable = workbook.worksheet_from_name("Explainable AI")?;
                for record in &conversation.explainables {
                    explainable.write_url(explainable_row, 0, conversation_link.clone())?;
                    explainable.write(explainable_row, 1, &record.user_input)?;
                    explainable.write(explainable_row, 2, &record.prompt_input)?;
                    explainable.write(explainable_row, 3, &record.response)?;
                    explainable.write(explainable_row, 4, record.message_number)?;
                    explainable.write(explainable_row, 5, record.role.as_str())?;
                    explainable.write(explainable_row, 6, record.valence)?;
                    explainable.write(explainable_row, 7, record.arousal)?;
                    explainable.write(explainable_row, 8, &record.created_at)?;
                    explainable_row += 1;
                }

                conversation_row += 1;
            }
            user_row += 1;
        }
        agent_row += 1;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Columns discovered from the data itself: registration extras on the
/// Users sheet, `pre_*`/`post_*` survey answers on the Conversations sheet.
fn dynamic_columns(export: &ExperimentExport) -> (Vec<String>, Vec<String>) {
    let mut user_keys: Vec<String> = Vec::new();
    let mut survey_keys: Vec<String> = Vec::new();

    for group in &export.agents {
        for user_export in &group.users {
            if let Some(extra) = user_export.user.extra.as_object() {
                for key in extra.keys() {
                    if !user_keys.iter().any(|k| k == key) {
                        user_keys.push(key.clone());
                    }
                }
            }
            for conversation in &user_export.conversations {
                let surveys = [
                    ("pre_", &conversation.metadata.pre_conversation),
                    ("post_", &conversation.metadata.post_conversation),
                ];
                for (prefix, survey) in surveys {
                    let Some(answers) = survey.as_ref().and_then(|s| s.as_object()) else {
                        continue;
                    };
                    for key in answers.keys() {
                        let column = format!("{prefix}{key}");
                        if !survey_keys.iter().any(|k| k == &column) {
                            survey_keys.push(column);
                        }
                    }
                }
            }
        }
    }
    (user_keys, survey_keys)
}

fn survey_value<'a>(
    metadata: &'a crate::store::types::ConversationMetadata,
    column: &str,
) -> Option<&'a serde_json::Value> {
    if let Some(key) = column.strip_prefix("pre_") {
        return metadata.pre_conversation.as_ref()?.get(key);
    }
    if let Some(key) = column.strip_prefix("post_") {
        return metadata.post_conversation.as_ref()?.get(key);
    }
    None
}

fn write_header(sheet: &mut Worksheet, columns: &[&str]) -> Result<()> {
    for (i, column) in columns.iter().enumerate() {
        sheet.write(0, i as u16, *column)?;
    }
    Ok(())
}

fn write_opt_number(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: Option<f64>,
) -> Result<()> {
    if let Some(value) = value {
        sheet.write(row, col, value)?;
    }
    Ok(())
}

fn write_value(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &serde_json::Value,
) -> Result<()> {
    match value {
        serde_json::Value::String(s) => sheet.write(row, col, s)?,
        serde_json::Value::Number(n) => {
            sheet.write(row, col, n.as_f64().unwrap_or_default())?
        }
        serde_json::Value::Bool(b) => sheet.write(row, col, *b)?,
        serde_json::Value::Null => return Ok(()),
        other => sheet.write(row, col, other.to_string())?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{build_workbook, dynamic_columns};
    use crate::export::{AgentGroup, ConversationExport, ExperimentExport, UserExport};
    use crate::store::testing::agent;
    use crate::store::types::{ConversationMetadata, User};

    fn sample_export() -> ExperimentExport {
        let condition = agent("A");
        let user = User {
            id: "u1".to_string(),
            experiment_id: "e1".to_string(),
            username: "alice".to_string(),
            password: String::new(),
            age: Some(30),
            gender: Some("female".to_string()),
            is_admin: false,
            number_of_conversations: 1,
            agent: Some(condition.clone()),
            extra: serde_json::json!({ "occupation": "student", "native": true }),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            timestamp: 0,
        };
        let metadata = ConversationMetadata {
            id: "c1".to_string(),
            experiment_id: "e1".to_string(),
            user_id: "u1".to_string(),
            conversation_number: 1,
            agent: condition.clone(),
            messages_number: 2,
            max_messages: Some(10),
            pre_conversation: Some(serde_json::json!({ "mood": 4 })),
            post_conversation: Some(serde_json::json!({ "mood": 5 })),
            is_finished: true,
            last_message_date: Some("2026-01-01T01:00:00Z".to_string()),
            last_message_timestamp: Some(1),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            timestamp: 0,
        };
        ExperimentExport {
            agents_mode: "single".to_string(),
            number_of_participants: 1,
            agents: vec![AgentGroup {
                condition,
                users: vec![UserExport {
                    user,
                    conversations: vec![ConversationExport {
                        metadata,
                        messages: Vec::new(),
                        explainables: Vec::new(),
                    }],
                }],
            }],
        }
    }

    #[test]
    fn workbook_bytes_are_produced() {
        let bytes = build_workbook(&sample_export()).unwrap();
        // xlsx is a zip container.
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn sample_rule_sheet_is_a_workbook() {
        let bytes = super::sample_rule_sheet().unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn dynamic_columns_discover_extras_and_surveys() {
        let (user_keys, survey_keys) = dynamic_columns(&sample_export());
        assert!(user_keys.contains(&"occupation".to_string()));
        assert!(user_keys.contains(&"native".to_string()));
        assert_eq!(survey_keys, vec!["pre_mood".to_string(), "post_mood".to_string()]);
    }
}
