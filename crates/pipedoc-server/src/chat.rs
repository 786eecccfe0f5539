//! Natural-language Q&A over the read-only result schema.
//!
//! The model translates the user's question into a single SELECT over the
//! store's tables; the query runs through the SELECT-only channel (capped
//! at 100 rows) and a second model call summarizes the rows. Anything that
//! is not a SELECT is refused with an explanation, never executed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use pipedoc_store::Store;
use pipedoc_vlm::TextChat;

static SQL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```sql\s*(.*?)\s*```").unwrap());

const SYSTEM_PROMPT_TEMPLATE: &str = "You are an AI assistant for analyzing marine/plant piping \
drawings (P&IDs and isometric BOM packages). Answer user questions by querying the SQLite \
database of extraction results.

Database schema:
{schema}

Rules:
1. Translate the user's natural-language question into a SQL query.
2. Wrap the SQL query in a ```sql ... ``` block.
3. Only SELECT statements are allowed (no INSERT, UPDATE, or DELETE).
4. Answer based on the query results, clearly and concisely.
5. Use the valves table for valve questions, pipe_bom and vlm_bom for BOM questions, \
symbols for legend questions, and dimensions for dimension questions.
6. Keep the answer brief and professional.

Response format:
- SQL query: ```sql SELECT ... ```
- Answer: a short summary of the results.";

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are an expert in marine/plant piping drawings. Answer concisely based on the data provided.";

/// Chat endpoint payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<std::collections::BTreeMap<String, serde_json::Value>>>,
}

/// Run one chat exchange: NL → SQL → execute → summarize.
pub async fn chat(store: &Store, llm: &TextChat, session_id: &str, message: &str) -> ChatOutcome {
    let schema = store.schema_text().unwrap_or_default();
    let system_prompt = SYSTEM_PROMPT_TEMPLATE.replace("{schema}", &schema);
    let context = format!("Current session: {session_id}\nUser question: {message}");

    let llm_response = llm.chat(&system_prompt, &context, 2048).await;

    let Some(caps) = SQL_BLOCK.captures(&llm_response) else {
        // No query produced: return the model's direct answer.
        return ChatOutcome {
            response: llm_response,
            sql_query: None,
            data: None,
        };
    };
    let sql_query = caps[1].trim().to_string();

    if !sql_query.to_uppercase().starts_with("SELECT") {
        return ChatOutcome {
            response: "Only SELECT queries can be executed against the result store.".to_string(),
            sql_query: Some(sql_query),
            data: None,
        };
    }

    match store.execute_select(&sql_query) {
        Ok(rows) => {
            let preview = serde_json::to_string_pretty(&rows[..rows.len().min(50)])
                .unwrap_or_default();
            let summary_prompt = format!(
                "Answer the user's question based on these SQL query results.\n\n\
                 User question: {message}\n\
                 SQL query: {sql_query}\n\
                 Query results ({} rows):\n{preview}\n\n\
                 Answer concisely and professionally; a small table is welcome.",
                rows.len()
            );
            let response = llm.chat(SUMMARY_SYSTEM_PROMPT, &summary_prompt, 2048).await;
            ChatOutcome {
                response,
                sql_query: Some(sql_query),
                data: Some(rows),
            }
        }
        Err(e) => {
            warn!(error = %e, "chat query failed");
            ChatOutcome {
                response: format!("The query could not be executed: {e}"),
                sql_query: Some(sql_query),
                data: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_block_extraction() {
        let text = "Here you go:\n```sql\nSELECT tag FROM valves\n```\nDone.";
        let caps = SQL_BLOCK.captures(text).unwrap();
        assert_eq!(caps[1].trim(), "SELECT tag FROM valves");
        assert!(SQL_BLOCK.captures("no sql here").is_none());
    }
}
