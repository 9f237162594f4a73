//! Instruction text for the coordinator and the analysis prompt composer.

use serde_json::Value;

/// Reply for questions the database cannot answer.
pub const OUT_OF_SCOPE_MESSAGE: &str =
    "Your question is outside the scope of this database. Please ask a question relevant to this database.";

/// Reply when intent classification produced nothing usable.
pub const UNCLEAR_QUESTION_MESSAGE: &str =
    "I could not understand the question. Please rephrase it as a question about the data.";

pub const SECTION_OVERVIEW: &str = "Results overview";
pub const SECTION_SQL: &str = "SQL Queries";
pub const SECTION_EXPLANATION: &str = "Explanation";
pub const SECTION_GRAPH: &str = "Graph";
pub const SECTION_RESULTS: &str = "Results";

/// Instruction handed to the planner with every turn.
pub const INSTRUCTION_PROMPT: &str = r#"You are an assistant that answers data questions using the provided tools. Never answer from your own knowledge; always use the tools.

Workflow:

1. Call `call_intent_understanding` with the user question. It returns a JSON object with one of these shapes:
   - `greeting_message`: return that message unchanged.
   - `use_database`: reply "Using database <name>".
   - empty object: reply "Your question is outside the scope of this database. Please ask a question relevant to this database."
   - `nl_to_sql_question` (and optionally `nl_to_python_question`): continue with step 2.

2. If `nl_to_sql_question` is not "N/A", call `call_db_agent` with `question: nl_to_sql_question`. Describe what data you need; do not write SQL yourself.

3. If `nl_to_python_question` is not "N/A", call `call_ds_agent` with `question: nl_to_python_question`. Do not write Python yourself.

4. Answer in markdown (not JSON) with these sections:
   - **Results overview:** natural language summary of the findings.
   - **SQL Queries:** SQL used to get the results; leave empty if none.
   - **Explanation:** step-by-step explanation of how the result was derived.
   - **Graph:** filename of any plot produced in step 3; leave empty if none. Use `load_artifacts` to inspect a produced file.
   - **Results:** detailed results in the format the user asked for.

Tool sequences:
- Greeting, database selection or out of scope: `call_intent_understanding` only.
- SQL question: `call_intent_understanding`, then `call_db_agent`.
- SQL and analysis: `call_intent_understanding`, `call_db_agent`, then `call_ds_agent`.

Always start with `call_intent_understanding`. Do not invent results, table names or columns. When `call_ds_agent` returns a result, summarize all previous steps in the answer format above.
"#;

/// Prompt sent to the analysis sub-agent: the question plus the data to work on.
pub fn compose_analysis_prompt(question: &str, data: &Value) -> String {
    let data = match data {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    format!(
        "Question to answer: {question}\n\n\
         The data needed to answer the question is already available below. \
         Do not query the database again.\n\n\
         {data}\n"
    )
}
