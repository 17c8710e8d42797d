//! Per-tick model request preparation

use crate::agent::Agent;
use crate::error::Result;
use crate::model::{Message, ModelItem, ModelRequest};
use crate::observe::SpanContext;
use crate::tool::{Context, ToolSet};

use super::event::ThreadEvent;

/// Build the request for one tick from the full history.
///
/// System events are dropped, bookkeeping is stripped, and tool enablement
/// is evaluated against the live context. Instructions go first as a
/// system message.
pub(crate) async fn prepare_request(
    agent: &Agent,
    context: &Context,
    history: &[ThreadEvent],
    tools: &ToolSet,
    span: SpanContext,
) -> Result<ModelRequest> {
    let instructions = agent.instructions(context).await?;

    let mut input: Vec<ModelItem> = Vec::with_capacity(history.len() + 1);
    if !instructions.is_empty() {
        input.push(ModelItem::Message(Message::system(instructions)));
    }
    input.extend(history.iter().filter_map(ThreadEvent::to_model_item));

    Ok(ModelRequest {
        input,
        settings: agent.settings().clone(),
        tools: tools.enabled_definitions(context),
        response_type: agent.response().response_format(),
        span: Some(span),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agent::ResponseShape;
    use crate::model::{ResponseFormat, Role};
    use crate::test_support::{echo_tool, BatchModel};
    use crate::thread::event::{EventData, SystemEvent};
    use crate::tool::{FunctionTool, ToolContext};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_request_shape() {
        let agent = Agent::builder("helper")
            .model(Arc::new(BatchModel::new(Vec::new())))
            .instructions("Be brief.")
            .response(ResponseShape::json("answer", json!({"type": "object"})).unwrap())
            .build()
            .unwrap();

        let gated = FunctionTool::new("admin", "Admin", |_ctx: ToolContext, _args: Value| async move {
            Ok(Value::Null)
        })
        .enabled_when(|ctx: &Context| ctx.get("admin").is_some());
        let tools = ToolSet::merge(vec![("kit".to_string(), vec![echo_tool(), gated.into()])]).unwrap();

        let history = vec![
            ThreadEvent::new("t1", 0, ModelItem::Message(Message::user("hi"))),
            ThreadEvent::new(
                "t1",
                1,
                EventData::System(SystemEvent {
                    name: "note".into(),
                    payload: Value::Null,
                }),
            ),
        ];

        let request = prepare_request(&agent, &Context::default(), &history, &tools, SpanContext::root())
            .await
            .unwrap();

        assert_eq!(request.input.len(), 2);
        assert!(matches!(&request.input[0], ModelItem::Message(m) if m.role == Role::System && m.text() == "Be brief."));
        assert_eq!(request.input[1], ModelItem::Message(Message::user("hi")));
        assert_eq!(request.tools.len(), 1);
        assert!(matches!(request.response_type, Some(ResponseFormat::JsonSchema { .. })));

        // Bookkeeping never reaches the wire.
        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire["input"][1].get("seq").is_none());
        assert!(wire.get("span").is_none());

        let admin = Context::new(json!({"admin": true}));
        let request = prepare_request(&agent, &admin, &history, &tools, SpanContext::root())
            .await
            .unwrap();
        assert_eq!(request.tools.len(), 2);
    }
}
