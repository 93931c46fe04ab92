use super::*;

fn parent_status<'v>(status: &'v serde_json::Value, gateway: &str) -> &'v serde_json::Value {
    status["parents"]
        .as_array()
        .expect("parents must be an array")
        .iter()
        .find(|p| p["parentRef"]["name"] == gateway)
        .unwrap_or_else(|| panic!("no parent {gateway} in {status}"))
}

fn setup_active_gateway(index: &SharedIndex) {
    apply_cluster(index, make_class("mesh", 0));
    apply(
        index,
        make_gateway("ns1", "gw-a", 100, vec![listener("http", 80, "HTTP")]),
    );
}

#[test]
fn route_accepted_and_resolved() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let parent = parent_status(status, "gw-a");

    assert_eq!(
        parent["controllerName"],
        meshgateway_controller_core::CONTROLLER_NAME
    );
    assert_eq!(parent["parentRef"]["kind"], "Gateway");
    assert_eq!(parent["parentRef"]["namespace"], "ns1");
    let accepted = find_condition(&parent["conditions"], "Accepted");
    assert_eq!(accepted["status"], "True");
    assert_eq!(accepted["reason"], "Accepted");
    let resolved = find_condition(&parent["conditions"], "ResolvedRefs");
    assert_eq!(resolved["status"], "True");
    assert_eq!(resolved["reason"], "ResolvedRefs");
}

#[test]
fn attached_routes_are_counted() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));
    apply(&index, make_http_route("ns1", "route-b", "gw-a", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&gateway_gkn("ns1", "gw-a")]);
    assert_eq!(status["listeners"][0]["attachedRoutes"], 2);
}

#[test]
fn missing_backend_is_reported() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let parent = parent_status(status, "gw-a");

    assert_eq!(find_condition(&parent["conditions"], "Accepted")["status"], "True");
    let resolved = find_condition(&parent["conditions"], "ResolvedRefs");
    assert_eq!(resolved["status"], "False");
    assert_eq!(resolved["reason"], "BackendNotFound");
}

#[test]
fn unsupported_backend_kind_is_reported() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    let mut route = make_http_route("ns1", "route-a", "gw-a", ("conf", None));
    route.spec.rules.as_mut().unwrap()[0].backend_refs.as_mut().unwrap()[0].kind =
        Some("ConfigMap".to_string());
    apply(&index, route);

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let resolved = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "ResolvedRefs",
    );
    assert_eq!(resolved["status"], "False");
    assert_eq!(resolved["reason"], "InvalidKind");
}

#[test]
fn cross_namespace_backend_requires_grant() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_backend_service("ns2", "svc-b"));
    apply(
        &index,
        make_http_route("ns1", "route-a", "gw-a", ("svc-b", Some("ns2"))),
    );

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let parent = parent_status(status, "gw-a");
    assert_eq!(find_condition(&parent["conditions"], "Accepted")["status"], "True");
    let resolved = find_condition(&parent["conditions"], "ResolvedRefs");
    assert_eq!(resolved["status"], "False");
    assert_eq!(resolved["reason"], "RefNotPermitted");

    apply(
        &index,
        gateway::ReferenceGrant {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns2".to_string()),
                name: Some("allow-routes".to_string()),
                ..Default::default()
            },
            spec: gateway::ReferenceGrantSpec {
                from: vec![gateway::ReferenceGrantFrom {
                    group: "gateway.networking.k8s.io".to_string(),
                    kind: "HTTPRoute".to_string(),
                    namespace: "ns1".to_string(),
                }],
                to: vec![gateway::ReferenceGrantTo {
                    group: "".to_string(),
                    kind: "Service".to_string(),
                    name: Some("svc-b".to_string()),
                }],
            },
        },
    );

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let resolved = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "ResolvedRefs",
    );
    assert_eq!(resolved["status"], "True");
}

#[test]
fn route_without_gateway_has_no_matching_parent() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let accepted = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "Accepted",
    );
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "NoMatchingParent");
}

#[test]
fn route_to_inactive_gateway_has_no_matching_parent() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(
        &index,
        make_gateway("ns1", "gw-b", 200, vec![listener("http", 80, "HTTP")]),
    );
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-b", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let accepted = find_condition(
        &parent_status(status, "gw-b")["conditions"],
        "Accepted",
    );
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "NoMatchingParent");
}

#[test]
fn kind_rejected_by_listener() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(
        &index,
        make_gateway("ns1", "gw-a", 100, vec![listener("tcp", 9000, "TCP")]),
    );
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let accepted = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "Accepted",
    );
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "NotAllowedByListeners");
}

#[test]
fn hostname_mismatch_rejected() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    let mut http = listener("http", 80, "HTTP");
    http.hostname = Some("*.example.com".to_string());
    apply(&index, make_gateway("ns1", "gw-a", 100, vec![http]));
    apply(&index, make_backend_service("ns1", "svc-a"));
    let mut route = make_http_route("ns1", "route-a", "gw-a", ("svc-a", None));
    route.spec.hostnames = Some(vec!["app.other.test".to_string()]);
    apply(&index, route);

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let accepted = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "Accepted",
    );
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "NoMatchingListenerHostname");
}

#[test]
fn section_name_selects_listener() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    apply_cluster(&index, make_class("mesh", 0));
    apply(
        &index,
        make_gateway(
            "ns1",
            "gw-a",
            100,
            vec![listener("http", 80, "HTTP"), listener("tcp", 9000, "TCP")],
        ),
    );
    apply(&index, make_backend_service("ns1", "svc-a"));
    let mut route = make_http_route("ns1", "route-a", "gw-a", ("svc-a", None));
    route.spec.parent_refs.as_mut().unwrap()[0].section_name = Some("tcp".to_string());
    apply(&index, route);

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&http_route_gkn("ns1", "route-a")]);
    let accepted = find_condition(
        &parent_status(status, "gw-a")["conditions"],
        "Accepted",
    );
    assert_eq!(accepted["status"], "False");
    assert_eq!(accepted["reason"], "NotAllowedByListeners");
}

#[test]
fn reapplying_an_unchanged_route_is_quiet() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));
    drain(&mut updates_rx);

    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));

    assert!(updates_rx.try_recv().is_err());
}

#[test]
fn deleted_route_stops_counting() {
    let (index, mut updates_rx, _claims_tx) = make_index();

    setup_active_gateway(&index);
    apply(&index, make_backend_service("ns1", "svc-a"));
    apply(&index, make_http_route("ns1", "route-a", "gw-a", ("svc-a", None)));
    drain(&mut updates_rx);

    delete::<gateway::HTTPRoute>(&index, "ns1", "route-a");

    let patches = drain(&mut updates_rx);
    let status = status_of(&patches[&gateway_gkn("ns1", "gw-a")]);
    assert_eq!(status["listeners"][0]["attachedRoutes"], 0);
    assert!(!patches.contains_key(&http_route_gkn("ns1", "route-a")));
}
