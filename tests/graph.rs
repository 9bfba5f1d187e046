use datatree::graph::DependencyGraph;
use datatree::node::Dependents;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (path, references) in edges {
        graph.set_references(path, set(references));
    }
    graph
}

#[test]
fn change_without_dependents_reevaluates_only_itself() {
    let graph = graph(&[
        ("Text1.text", &["Input1.text"]),
        ("Input1.text", &[]),
        ("Input2.text", &[]),
    ]);
    assert_eq!(graph.reevaluation_set(&["Input2.text".to_string()]), set(&["Input2.text"]));
}

#[test]
fn reevaluation_follows_dependents_transitively() {
    let graph = graph(&[
        ("Input1.text", &[]),
        ("Text1.text", &["Input1.text"]),
        ("Text2.text", &["Text1.text"]),
        ("Text3.text", &["Input2.text"]),
    ]);
    assert_eq!(
        graph.reevaluation_set(&["Input1.text".to_string()]),
        set(&["Input1.text", "Text1.text", "Text2.text"])
    );
}

#[test]
fn references_match_ancestors_and_descendants() {
    let graph = graph(&[
        ("Text1.text", &["Api1.data"]),
        ("Text2.text", &["Table1"]),
        ("Table1.selectedRow", &[]),
    ]);
    assert_eq!(graph.dependents_of("Api1.data.users"), set(&["Text1.text"]));
    assert_eq!(graph.dependents_of("Api1"), set(&["Text1.text"]));
    assert_eq!(graph.resolve("Table1"), set(&["Table1.selectedRow"]));
    assert_eq!(graph.dependencies_of("Text2.text"), set(&["Table1.selectedRow"]));
    // A static change below a referenced path still seeds the walk.
    assert_eq!(graph.reevaluation_set(&["Api1.data.users".to_string()]), set(&["Text1.text"]));
}

#[test]
fn topological_order_puts_dependencies_first() {
    let graph = graph(&[
        ("A.a", &["B.b"]),
        ("B.b", &["C.c"]),
        ("C.c", &[]),
        ("D.d", &["C.c"]),
    ]);
    let order = graph.topo_sort(&set(&["A.a", "B.b", "C.c", "D.d"]));
    let position = |p: &str| order.iter().position(|x| x == p).unwrap();

    assert_eq!(order.len(), 4);
    assert!(position("C.c") < position("B.b"));
    assert!(position("B.b") < position("A.a"));
    assert!(position("C.c") < position("D.d"));
}

#[test]
fn topological_order_ignores_paths_outside_the_subset() {
    let graph = graph(&[("A.a", &["B.b"]), ("B.b", &[])]);
    assert_eq!(graph.topo_sort(&set(&["A.a"])), vec!["A.a".to_string()]);
}

#[test]
fn two_node_cycle_is_detected() {
    let mut graph = graph(&[
        ("A.value", &["B.value"]),
        ("B.value", &["A.value"]),
        ("C.value", &["A.value"]),
    ]);
    let cycles = graph.detect_cycles().to_vec();

    assert_eq!(cycles, vec![vec!["A.value".to_string(), "B.value".to_string()]]);
    assert!(graph.is_cyclic("A.value"));
    assert!(graph.is_cyclic("B.value"));
    assert!(!graph.is_cyclic("C.value"));
    // Sorting still terminates and yields every node.
    assert_eq!(graph.topo_sort(&set(&["A.value", "B.value", "C.value"])).len(), 3);
}

#[test]
fn self_reference_is_a_cycle() {
    let mut graph = graph(&[("A.value", &["A.value"])]);
    assert_eq!(graph.detect_cycles().len(), 1);
    assert!(graph.is_cyclic("A.value"));
}

#[test]
fn recheck_clears_a_broken_cycle_and_finds_a_new_one() {
    let mut graph = graph(&[("A.x", &["B.y"]), ("B.y", &["A.x"]), ("C.z", &[])]);
    graph.detect_cycles();

    graph.set_references("B.y", BTreeSet::new());
    assert!(graph.recheck_cycles(&set(&["B.y"])).is_empty());
    assert!(!graph.is_cyclic("A.x"));

    graph.set_references("C.z", set(&["C.z"]));
    let cycles = graph.recheck_cycles(&set(&["C.z"])).to_vec();
    assert_eq!(cycles, vec![vec!["C.z".to_string()]]);
    assert_eq!(graph.cycle_of("C.z"), Some(&vec!["C.z".to_string()]));
}

#[test]
fn removing_a_node_drops_its_reverse_edges() {
    let mut graph = graph(&[("Text1.text", &["Input1.text"]), ("Input1.text", &[])]);
    assert!(graph.remove_node("Text1.text"));
    assert!(graph.dependents_of("Input1.text").is_empty());
    assert!(!graph.remove_node("Text1.text"));
    assert_eq!(graph.len(), 1);
}

#[test]
fn set_references_reports_changes() {
    let mut graph = DependencyGraph::new();
    assert!(graph.set_references("A.a", set(&["B.b"])));
    assert!(!graph.set_references("A.a", set(&["B.b"])));
    assert!(graph.set_references("A.a", set(&["C.c"])));
    assert!(graph.dependents_of("B.b").is_empty());
    assert_eq!(graph.dependents_of("C.c"), set(&["A.a"]));
}

#[test]
fn dependents_grow_from_vector_to_set() {
    let mut dependents = Dependents::default();
    for i in 0..7 {
        dependents.insert(&format!("T{}.text", i));
    }
    assert!(matches!(dependents, Dependents::Vector(_)));

    dependents.insert("T7.text");
    dependents.insert("T7.text");
    assert!(matches!(dependents, Dependents::Set(_)));
    assert_eq!(dependents.iter().count(), 8);

    for i in 0..8 {
        dependents.remove(&format!("T{}.text", i));
    }
    assert!(dependents.is_empty());
    assert_eq!(dependents, Dependents::None);
}
