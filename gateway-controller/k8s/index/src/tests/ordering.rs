use super::*;
use crate::compile::sort_outbound_matches;
use meshgateway_controller_core::document::{OutboundTrafficMatch, PathMatchType};

fn compiled_rules(rules: Vec<gateway::HTTPRouteRules>) -> Vec<(String, PathMatchType)> {
    let (index, _rx) = make_index();
    apply_working_gateway(&index);
    apply(
        &index,
        make_http_route_with_rules("ns1", "r1", "gw-a", rules),
    );

    let issuer = StaticIssuer::default();
    let docs = index.write().compile_all(&issuer).expect("compiles");
    docs[0].1.outbound.traffic_matches[&80][0].http_service_route_rules[&ruleset_name("ns1/r1")]
        .iter()
        .map(|rule| (rule.path.clone(), rule.path_match_type))
        .collect()
}

#[test]
fn rules_are_ordered_by_path_specificity() {
    use gateway::HTTPRouteRulesMatchesPathType::{Exact, PathPrefix, RegularExpression};
    let rules = compiled_rules(vec![
        http_rule(Some(path_match(RegularExpression, ".*")), ("svc-a", 8080)),
        http_rule(Some(path_match(PathPrefix, "/")), ("svc-a", 8080)),
        http_rule(Some(path_match(Exact, "/api/v1")), ("svc-a", 8080)),
        http_rule(Some(path_match(PathPrefix, "/api")), ("svc-a", 8080)),
    ]);

    assert_eq!(
        rules,
        vec![
            ("/api/v1".to_string(), PathMatchType::Exact),
            ("/api".to_string(), PathMatchType::Prefix),
            ("/".to_string(), PathMatchType::Prefix),
            (".*".to_string(), PathMatchType::Regex),
        ],
    );
}

#[test]
fn header_matches_break_specificity_ties() {
    let mut with_header = http_rule(
        Some(path_match(
            gateway::HTTPRouteRulesMatchesPathType::PathPrefix,
            "/api",
        )),
        ("svc-a", 8080),
    );
    if let Some(matches) = &mut with_header.matches {
        matches[0].headers = Some(vec![gateway::HTTPRouteRulesMatchesHeaders {
            name: "x-tenant".to_string(),
            r#type: Some(gateway::HTTPRouteRulesMatchesHeadersType::Exact),
            value: "a".to_string(),
        }]);
    }

    let (index, _rx) = make_index();
    apply_working_gateway(&index);
    apply(
        &index,
        make_http_route_with_rules(
            "ns1",
            "r1",
            "gw-a",
            vec![
                http_rule(
                    Some(path_match(
                        gateway::HTTPRouteRulesMatchesPathType::PathPrefix,
                        "/api",
                    )),
                    ("svc-a", 8080),
                ),
                with_header,
            ],
        ),
    );

    let issuer = StaticIssuer::default();
    let docs = index.write().compile_all(&issuer).expect("compiles");
    let rules = &docs[0].1.outbound.traffic_matches[&80][0].http_service_route_rules
        [&ruleset_name("ns1/r1")];
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].headers.len(), 1);
    assert!(rules[1].headers.is_empty());
}

#[test]
fn grpc_methods_become_exact_paths() {
    let (index, _rx) = make_index();
    apply_working_gateway(&index);
    apply(
        &index,
        gateway::GRPCRoute {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns1".to_string()),
                name: Some("g1".to_string()),
                ..Default::default()
            },
            spec: gateway::GRPCRouteSpec {
                parent_refs: Some(vec![gateway::GRPCRouteParentRefs {
                    group: None,
                    kind: None,
                    namespace: None,
                    name: "gw-a".to_string(),
                    section_name: None,
                    port: None,
                }]),
                hostnames: None,
                rules: Some(vec![gateway::GRPCRouteRules {
                    matches: Some(vec![gateway::GRPCRouteRulesMatches {
                        method: Some(gateway::GRPCRouteRulesMatchesMethod {
                            method: Some("GetFeature".to_string()),
                            service: Some("routeguide.RouteGuide".to_string()),
                            r#type: Some(gateway::GRPCRouteRulesMatchesMethodType::Exact),
                        }),
                        headers: None,
                    }]),
                    backend_refs: Some(vec![gateway::GRPCRouteRulesBackendRefs {
                        name: "svc-a".to_string(),
                        port: Some(8080),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }]),
            },
            status: None,
        },
    );

    let issuer = StaticIssuer::default();
    let docs = index.write().compile_all(&issuer).expect("compiles");
    let rules = &docs[0].1.outbound.traffic_matches[&80][0].http_service_route_rules
        [&ruleset_name("ns1/g1")];
    assert_eq!(rules[0].path, "/routeguide.RouteGuide/GetFeature");
    assert_eq!(rules[0].path_match_type, PathMatchType::Exact);
    assert_eq!(rules[0].methods, vec!["POST".to_string()]);
}

#[test]
fn outbound_matches_sort_most_specific_first() {
    let mk = |name: &str, ranges: &[&str]| OutboundTrafficMatch {
        name: name.to_string(),
        port: 80,
        protocol: "HTTP".to_string(),
        destination_ip_ranges: ranges.iter().map(ToString::to_string).collect(),
        ..Default::default()
    };

    let mut matches = vec![
        mk("80_wide", &["10.0.0.0/8"]),
        mk("80_host", &["10.1.2.3/32"]),
        mk("80_subnet", &["10.1.0.0/16"]),
    ];
    sort_outbound_matches(&mut matches);
    let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["80_host", "80_subnet", "80_wide"]);
}

#[test]
fn longer_range_lists_win_prefix_ties() {
    let mk = |name: &str, ranges: &[&str]| OutboundTrafficMatch {
        name: name.to_string(),
        port: 80,
        protocol: "HTTP".to_string(),
        destination_ip_ranges: ranges.iter().map(ToString::to_string).collect(),
        ..Default::default()
    };

    let mut matches = vec![
        mk("80_one", &["10.1.2.3/32"]),
        mk("80_two", &["10.1.2.4/32", "10.1.2.5/32"]),
    ];
    sort_outbound_matches(&mut matches);
    assert_eq!(matches[0].name, "80_two");

    // The match name breaks full ties deterministically.
    let mut tied = vec![mk("80_b", &["10.0.0.1/32"]), mk("80_a", &["10.0.0.2/32"])];
    sort_outbound_matches(&mut tied);
    assert_eq!(tied[0].name, "80_a");
}
