use datatree::engine::{DataTreeEvaluator, Edit};
use datatree::entity::{Entity, EntityConfig, EntityType, FunctionMeta, SubstitutionType};
use datatree::jsobject::ParsedJsBody;
use datatree::sandbox::Effect;
use datatree::value::Value;
use datatree::worker::EvaluationWorker;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn evaluator() -> DataTreeEvaluator {
    let mut evaluator = DataTreeEvaluator::default();
    evaluator
        .register_entity(
            Entity::create("Input1", EntityType::Widget).with_property("text", "hi"),
            EntityConfig::default(),
        )
        .unwrap();
    evaluator
        .register_entity(
            Entity::create("Text1", EntityType::Widget).with_property("text", "{{ Input1.text + '!' }}"),
            EntityConfig::with_bindings(&[("text", SubstitutionType::Template)]),
        )
        .unwrap();
    evaluator
}

#[test]
fn edits_are_evaluated_on_the_worker() {
    let (worker, _effects) = EvaluationWorker::spawn(evaluator());
    worker.evaluate_full();
    worker.flush();
    assert_eq!(worker.snapshot().get("Text1.text"), Some(&Value::str("hi!")));

    for text in ["a", "b", "c"] {
        worker.set_value("Input1", "text", text);
    }
    worker.flush();
    assert_eq!(worker.snapshot().get("Text1.text"), Some(&Value::str("c!")));

    worker.remove("Text1");
    worker.flush();
    assert!(worker.snapshot().entity("Text1").is_none());
}

#[test]
fn effects_are_published() {
    let (worker, effects) = EvaluationWorker::spawn(DataTreeEvaluator::default());
    worker.register(
        Entity::create("Button1", EntityType::Widget).with_property("label", "{{ storeValue('clicked', 1) }}"),
        EntityConfig::with_bindings(&[("label", SubstitutionType::Template)]),
    );
    worker.flush();

    let received = effects.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        received,
        vec![Effect::StoreValue {
            key: "clicked".to_string(),
            value: Value::Number(1.0),
        }]
    );
}

#[test]
fn shutdown_returns_the_evaluator() {
    let (worker, _effects) = EvaluationWorker::spawn(evaluator());
    worker.set_value("Input1", "text", "bye");
    worker.flush();

    let evaluator = worker.shutdown().unwrap();
    assert_eq!(evaluator.pending(), 0);
    assert_eq!(evaluator.snapshot().get("Text1.text"), Some(&Value::str("bye!")));
}

#[test]
fn edits_behind_a_failed_edit_are_flushed() {
    let mut evaluator = evaluator();
    let mut config = EntityConfig::js_object();
    config
        .meta
        .insert("ghost".to_string(), FunctionMeta::with_arguments(Vec::new()));
    evaluator
        .register_entity(Entity::create("JSBad", EntityType::JsAction), config)
        .unwrap();
    evaluator.process_pending().unwrap();

    let (worker, _effects) = EvaluationWorker::spawn(evaluator);
    worker.submit(Edit::JsObjectParse {
        entity: "JSBad".to_string(),
        body: ParsedJsBody::default().variable("v", "1"),
    });
    worker.set_value("Input1", "text", "after");
    worker.flush();

    assert_eq!(worker.snapshot().get("Text1.text"), Some(&Value::str("after!")));
    let evaluator = worker.shutdown().unwrap();
    assert_eq!(evaluator.pending(), 0);
}
