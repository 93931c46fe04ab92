use super::*;

#[test]
fn matching_class_is_accepted() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 100));

    let patches = drain(&mut updates_rx);
    let id = NamespaceGroupKindName {
        namespace: String::new(),
        gkn: GroupKindName {
            group: "gateway.networking.k8s.io".into(),
            kind: "GatewayClass".into(),
            name: "mesh".to_string().into(),
        },
    };
    let status = status_of(&patches[&id]);
    let accepted = find_condition(&status["conditions"], "Accepted");
    assert_eq!(accepted["status"], "True");
    assert_eq!(accepted["reason"], "Accepted");
    assert_eq!(accepted["observedGeneration"], 1);
}

#[test]
fn foreign_class_gets_no_status() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    let mut class = make_class("other", 100);
    class.spec.controller_name = "example.com/some-other-controller".to_string();
    apply_cluster(&index, class);

    assert!(updates_rx.try_recv().is_err());
}

#[test]
fn oldest_gateway_is_active() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-old", 100, vec![listener("http", 80, "HTTP")]));
    apply(&index, make_gateway("ns1", "gw-new", 200, vec![listener("http", 80, "HTTP")]));

    let patches = drain(&mut updates_rx);

    let old = status_of(&patches[&gateway_gkn("ns1", "gw-old")]);
    let accepted = find_condition(&old["conditions"], "Accepted");
    assert_eq!(accepted["status"], "True");
    assert_eq!(accepted["reason"], "Accepted");

    let new = status_of(&patches[&gateway_gkn("ns1", "gw-new")]);
    let accepted = find_condition(&new["conditions"], "Accepted");
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "Unaccepted");
    let programmed = find_condition(&new["conditions"], "Programmed");
    assert_eq!(programmed["status"], "False");
    assert_eq!(programmed["reason"], "Unaccepted");
}

#[test]
fn creation_ties_break_by_name() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-b", 100, vec![listener("http", 80, "HTTP")]));
    apply(&index, make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]));

    let patches = drain(&mut updates_rx);

    let a = status_of(&patches[&gateway_gkn("ns1", "gw-a")]);
    assert_eq!(find_condition(&a["conditions"], "Accepted")["status"], "True");
    let b = status_of(&patches[&gateway_gkn("ns1", "gw-b")]);
    assert_eq!(find_condition(&b["conditions"], "Accepted")["status"], "False");
}

#[test]
fn elections_are_per_namespace() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]));
    apply(&index, make_gateway("ns2", "gw-b", 200, vec![listener("http", 80, "HTTP")]));

    let patches = drain(&mut updates_rx);

    for id in [gateway_gkn("ns1", "gw-a"), gateway_gkn("ns2", "gw-b")] {
        let status = status_of(&patches[&id]);
        assert_eq!(
            find_condition(&status["conditions"], "Accepted")["status"],
            "True",
            "{id} should be active in its own namespace"
        );
    }
}

#[test]
fn runner_up_takes_over_after_delete() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-old", 100, vec![listener("http", 80, "HTTP")]));
    apply(&index, make_gateway("ns1", "gw-new", 200, vec![listener("http", 80, "HTTP")]));
    drain(&mut updates_rx);

    delete::<gateway::Gateway>(&index, "ns1", "gw-old");

    let patches = drain(&mut updates_rx);
    let new = status_of(&patches[&gateway_gkn("ns1", "gw-new")]);
    assert_eq!(
        find_condition(&new["conditions"], "Accepted")["status"],
        "True"
    );
}

#[test]
fn gateway_for_unmatched_class_is_never_active() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    let mut gw = make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]);
    gw.spec.gateway_class_name = "other".to_string();
    apply(&index, gw);

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&gateway_gkn("ns1", "gw-a")]);
    assert_eq!(
        find_condition(&status["conditions"], "Accepted")["reason"],
        "Unaccepted"
    );
}

#[test]
fn identical_reapply_sends_nothing() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]));
    drain(&mut updates_rx);

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]));

    assert!(updates_rx.try_recv().is_err());
}

#[test]
fn observed_generation_never_regresses() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    let mut gw = make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]);
    gw.metadata.generation = Some(5);
    apply(&index, gw);

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&gateway_gkn("ns1", "gw-a")]);
    assert_eq!(
        find_condition(&status["conditions"], "Accepted")["observedGeneration"],
        5
    );

    // A stale re-observation must not roll the generation back; the computed
    // status is unchanged, so no patch is emitted at all.
    let mut gw = make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]);
    gw.metadata.generation = Some(3);
    apply(&index, gw);

    assert!(updates_rx.try_recv().is_err());
}
