use staticrt::ir::{parse_graph, print_graph, TextIrError, TypeKind};

#[test]
fn parse_assigns_types_and_wires_uses() {
    let graph = parse_graph(
        r#"
        graph(%a, %shape : int[]):
          %alpha : int = prim::Constant[value=1]()
          %b = aten::add(%a, %a, %alpha)
          %c = aten::reshape(%b, %shape)
          return (%c)
        "#,
    )
    .expect("valid graph");

    assert_eq!(graph.inputs().len(), 2);
    assert_eq!(*graph.value_type(graph.inputs()[0]), TypeKind::Tensor);
    assert_eq!(*graph.value_type(graph.inputs()[1]), TypeKind::IntList);
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.outputs().len(), 1);

    let add = graph
        .nodes()
        .find(|&n| graph.kind(n).as_str() == "aten::add")
        .expect("add node present");
    // %a feeds slots 0 and 1 of the add node.
    let a = graph.inputs()[0];
    assert_eq!(
        graph.uses(a).iter().filter(|u| u.node == add).count(),
        2
    );
}

#[test]
fn constants_carry_payloads() {
    let graph = parse_graph(
        r#"
        graph(%a):
          %dims : int[] = prim::Constant[value=[1, 0]]()
          %none = prim::Constant()
          %b = aten::permute(%a, %dims)
          return (%b)
        "#,
    )
    .expect("valid graph");

    let payloads: Vec<String> = graph
        .nodes()
        .filter(|&n| graph.kind(n).as_str() == "prim::Constant")
        .map(|n| graph.node_ival(n).expect("payload").tag_name().to_owned())
        .collect();
    assert_eq!(payloads, vec!["IntList", "None"]);
}

#[test]
fn print_then_parse_round_trips() {
    let source = r#"
        graph(%a, %b):
          %alpha : int = prim::Constant[value=2]()
          %c = aten::add(%a, %b, %alpha)
          %d = aten::mul(%c, %c)
          return (%d)
    "#;
    let graph = parse_graph(source).expect("valid graph");
    let printed = print_graph(&graph);
    let reparsed = parse_graph(&printed).expect("printed graph parses");
    assert_eq!(reparsed.node_count(), graph.node_count());
    assert_eq!(reparsed.inputs().len(), graph.inputs().len());
    assert_eq!(print_graph(&reparsed), printed);
}

#[test]
fn parse_errors_are_reported() {
    assert!(matches!(
        parse_graph(""),
        Err(TextIrError::Message(_))
    ));
    assert!(parse_graph("graph(%a):\n  return (%missing)\n").is_err());
    assert!(parse_graph("graph(%a):\n  %b = aten::relu(%a)\n").is_err());
    assert!(parse_graph(
        "graph(%a):\n  %b = aten::relu[value=1](%a)\n  return (%b)\n"
    )
    .is_err());
}

#[test]
fn tuple_types_parse() {
    let graph = parse_graph(
        r#"
        graph(%a, %b):
          %t = prim::TupleConstruct(%a, %b)
          return (%t)
        "#,
    )
    .expect("valid graph");
    let t = graph.outputs()[0];
    assert_eq!(
        *graph.value_type(t),
        TypeKind::Tuple(vec![TypeKind::Tensor, TypeKind::Tensor])
    );
}
