//! End-to-end runs of small dataflow workflows under each director.

use cinnabar::prelude::*;
use std::sync::{Arc, Mutex};

type Received = Arc<Mutex<Vec<NodeValue>>>;

fn emitter() -> Actor {
    Actor::new(FnActor::new(|ctx| {
        let value = ctx.input("value").cloned().unwrap_or_default();
        ctx.set_output("value", value)?;
        Ok(())
    }))
    .with_input("value", InputSignature::new())
    .with_output("value", OutputSignature::new())
}

fn multiplier() -> Actor {
    Actor::new(FnActor::new(|ctx| {
        let a: i64 = ctx.input_as("a")?;
        let b: i64 = ctx.input_as("b")?;
        ctx.set_output("c", json!(a * b))?;
        Ok(())
    }))
    .with_input("a", InputSignature::new())
    .with_input("b", InputSignature::new())
    .with_output("c", OutputSignature::new())
}

fn collector(received: &Received) -> Actor {
    let received = Arc::clone(received);
    Actor::new(FnActor::new(move |ctx| {
        let value = ctx.input("value").cloned().unwrap_or_default();
        received.lock().unwrap().push(value);
        Ok(())
    }))
    .with_input("value", InputSignature::new())
}

fn multiplication_workflow(director: impl Director + 'static, received: &Received) -> Actor {
    WorkflowBuilder::new("Multiplication")
        .director(director)
        .node(
            NodeBuilder::new("A")
                .actor(emitter())
                .sequence("value", vec![json!(3), json!(8), json!(2)])
                .outflow("value", "/multiplicand")
                .build(),
        )
        .node(
            NodeBuilder::new("B")
                .actor(multiplier())
                .constant("a", json!(5))
                .inflow("b", "/multiplicand")
                .outflow("c", "/product")
                .build(),
        )
        .node(
            NodeBuilder::new("C")
                .actor(collector(received))
                .inflow("value", "/product")
                .build(),
        )
        .build()
        .unwrap()
}

async fn assert_products(director: impl Director + 'static) {
    let received = Received::default();
    let mut workflow = multiplication_workflow(director, &received);
    workflow.run(Variables::new()).await.unwrap();

    assert_eq!(*received.lock().unwrap(), vec![json!(15), json!(40), json!(10)]);
    let workflow = workflow.logic_as::<Workflow>().unwrap();
    assert_eq!(workflow.node("A").unwrap().step_count(), 3);
    assert_eq!(workflow.node("B").unwrap().step_count(), 3);
    assert!(workflow.last_wrapup().is_empty());
}

#[tokio::test]
async fn test_multiplication_with_data_driven_director() {
    assert_products(DataDrivenDirector::new()).await;
}

#[tokio::test]
async fn test_multiplication_with_publish_subscribe_director() {
    assert_products(PublishSubscribeDirector::new()).await;
}

#[tokio::test]
async fn test_multiplication_with_concurrent_director() {
    assert_products(ConcurrentDataDrivenDirector::new()).await;
}

#[tokio::test]
async fn test_data_driven_director_buffers_every_inflow() {
    let received = Received::default();
    let mut workflow = multiplication_workflow(DataDrivenDirector::new(), &received);
    workflow.run(Variables::new()).await.unwrap();

    let workflow = workflow.logic_as::<Workflow>().unwrap();
    let buffers: Vec<&str> = workflow
        .nodes()
        .filter(|n| n.core().is_hidden())
        .map(|n| n.name())
        .collect();
    assert_eq!(buffers, vec!["BufferNode-for-B-b", "BufferNode-for-C-value"]);
}

async fn assert_offsets_end_their_streams_once(director: impl Director + 'static) {
    let received = Received::default();
    let recorder = Arc::new(MemoryTraceRecorder::new());
    let context = WorkflowContext::builder().recorder(recorder.clone()).build();

    let adder = Actor::new(FnActor::new(|ctx| {
        let k: i64 = ctx.input_as("k")?;
        let v: i64 = ctx.input_as("v")?;
        ctx.set_output("sum", json!(k + v))?;
        Ok(())
    }))
    .with_input("k", InputSignature::new())
    .with_input("v", InputSignature::new())
    .with_output("sum", OutputSignature::new());

    let mut workflow = WorkflowBuilder::new("Offsets")
        .director(director)
        .context(context)
        .node(
            NodeBuilder::new("Offset")
                .actor(emitter())
                .constant("value", json!(100))
                .outflow("value", "/offset")
                .build(),
        )
        .node(
            NodeBuilder::new("Values")
                .actor(emitter())
                .sequence("value", vec![json!(1), json!(2), json!(3)])
                .outflow("value", "/values")
                .build(),
        )
        .node(
            NodeBuilder::new("Adder")
                .actor(adder)
                .receive_once_inflow("k", "/offset")
                .inflow("v", "/values")
                .outflow("sum", "/sums")
                .build(),
        )
        .node(
            NodeBuilder::new("Sink")
                .actor(collector(&received))
                .inflow("value", "/sums")
                .build(),
        )
        .build()
        .unwrap();
    workflow.run(Variables::new()).await.unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        vec![json!(101), json!(102), json!(103)]
    );
    let workflow = workflow.logic_as::<Workflow>().unwrap();
    let adder = workflow.node("Adder").unwrap();
    assert_eq!(adder.step_count(), 3);
    assert!(adder.core().all_eos_sent());
    assert_eq!(recorder.packets_sent("Adder", "sum").len(), 3);
    assert_eq!(recorder.steps_started("Adder"), 3);

    assert_eq!(recorder.end_of_stream_sent("Adder", "sum"), 1);
    assert_eq!(recorder.end_of_stream_sent("Offset", "value"), 1);
    assert_eq!(recorder.end_of_stream_sent("Values", "value"), 1);
}

#[tokio::test]
async fn test_receive_once_inflow_and_end_of_stream_with_data_driven_director() {
    assert_offsets_end_their_streams_once(DataDrivenDirector::new()).await;
}

#[tokio::test]
async fn test_receive_once_inflow_and_end_of_stream_with_publish_subscribe_director() {
    assert_offsets_end_their_streams_once(PublishSubscribeDirector::new()).await;
}

#[tokio::test]
async fn test_receive_once_inflow_and_end_of_stream_with_concurrent_director() {
    assert_offsets_end_their_streams_once(ConcurrentDataDrivenDirector::new()).await;
}

#[tokio::test]
async fn test_workflow_inputs_and_outputs_pass_through_portals() {
    let recorder = Arc::new(MemoryTraceRecorder::new());
    let context = WorkflowContext::builder().recorder(recorder.clone()).build();
    let mut workflow = WorkflowBuilder::new("Product")
        .director(PublishSubscribeDirector::new())
        .context(context)
        .input_flow("a", "/in/a")
        .input_flow("b", "/in/b")
        .node(
            NodeBuilder::new("Multiply")
                .actor(multiplier())
                .inflow("a", "/in/a")
                .inflow("b", "/in/b")
                .outflow("c", "/out/c")
                .build(),
        )
        .output_flow("product", "/out/c")
        .build()
        .unwrap();

    let inputs = Variables::from([("a".to_string(), json!(6)), ("b".to_string(), json!(7))]);
    let outputs = workflow.run(inputs).await.unwrap();
    assert_eq!(outputs["product"], json!(42));

    let kinds: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.source == "Product")
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds.first(), Some(&TraceEventKind::WorkflowRunStarted));
    assert!(kinds.contains(&TraceEventKind::WorkflowOutput {
        label: "product".to_string(),
        value: json!(42),
    }));
}

#[tokio::test]
async fn test_missing_output_value_is_null() {
    let mut workflow = WorkflowBuilder::new("Filter")
        .director(DataDrivenDirector::new())
        .input_flow("x", "/x")
        .node(
            NodeBuilder::new("Positive")
                .actor(
                    Actor::new(FnActor::new(|ctx| {
                        let x: i64 = ctx.input_as("x")?;
                        if x <= 0 {
                            ctx.disable_output("y");
                        }
                        ctx.set_output("y", json!(x))?;
                        Ok(())
                    }))
                    .with_input("x", InputSignature::new())
                    .with_output("y", OutputSignature::new()),
                )
                .inflow("x", "/x")
                .outflow("y", "/y")
                .build(),
        )
        .output_flow("y", "/y")
        .build()
        .unwrap();

    let inputs = Variables::from([("x".to_string(), json!(-4))]);
    let outputs = workflow.run(inputs).await.unwrap();
    assert_eq!(outputs["y"], NodeValue::Null);
}

#[tokio::test]
async fn test_context_property_feeds_inflow_through_source_node() {
    let context = WorkflowContext::builder()
        .property("greeting", json!("hello"))
        .build();
    let mut workflow = WorkflowBuilder::new("Greeting")
        .director(DataDrivenDirector::new())
        .context(context)
        .node(
            NodeBuilder::new("Greet")
                .actor(
                    Actor::new(FnActor::new(|ctx| {
                        let greeting: String = ctx.input_as("greeting")?;
                        ctx.set_output("message", json!(format!("{} world", greeting)))?;
                        Ok(())
                    }))
                    .with_input("greeting", InputSignature::new())
                    .with_output("message", OutputSignature::new()),
                )
                .inflow("greeting", "context:/property/greeting")
                .outflow("message", "/message")
                .build(),
        )
        .output_flow("message", "/message")
        .build()
        .unwrap();

    let outputs = workflow.run(Variables::new()).await.unwrap();
    assert_eq!(outputs["message"], json!("hello world"));

    let workflow = workflow.logic_as::<Workflow>().unwrap();
    assert!(workflow.nodes().any(|n| n.name() == "Source1"));
    assert_eq!(workflow.node("Greet").unwrap().step_count(), 1);
}
