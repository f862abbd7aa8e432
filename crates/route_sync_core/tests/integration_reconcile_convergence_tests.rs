mod support;

use route_sync_core::binding::HttpVerb;
use route_sync_core::path::PathSpec;
use route_sync_core::reconciler::PathStatus;
use support::fixture::Fixture;

#[test]
fn second_run_with_same_declaration_creates_nothing() {
    let fixture = Fixture::new();
    let declaration = fixture.declaration("users", &["/timesheets", "/timesheets/{id}"]);

    let first = fixture.reconcile(&declaration);
    let tree_after_first = fixture.gateway.paths(&fixture.api_id);
    let second = fixture.reconcile(&declaration);

    assert!(first.changed());
    assert_eq!(first.created_resources.len(), 2);
    assert_eq!(first.created_methods.len(), 12);
    assert_eq!(first.created_integrations.len(), 12);
    assert_eq!(first.created_grants.len(), 2);

    assert!(!second.changed());
    assert_eq!(second.created_total(), 0);
    assert_eq!(second.already_present.methods, 12);
    assert_eq!(second.already_present.integrations, 12);
    assert_eq!(second.already_present.grants, 2);
    assert_eq!(fixture.gateway.paths(&fixture.api_id), tree_after_first);
}

#[test]
fn every_declared_path_resolves_after_one_run() {
    let fixture = Fixture::new();
    let paths = [
        "/_health/users",
        "/users",
        "/users/{id}",
        "/users/{id}/sessions",
        "/admin/users/export",
    ];
    let declaration = fixture.declaration("users", &paths);

    let report = fixture.reconcile(&declaration);
    assert!(!report.has_failures());

    let index = fixture.index();
    for path in paths {
        let spec = PathSpec::parse(path).expect("path should parse");
        let leaf = index
            .resolve(&spec)
            .unwrap_or_else(|| panic!("{path} should resolve"));
        assert_eq!(leaf.path, path);
        for verb in HttpVerb::ALL {
            let method = fixture
                .gateway
                .method(&fixture.api_id, path, verb)
                .expect("method should exist");
            assert_eq!(
                method.integration_uri,
                Some(fixture.target("users").integration_uri())
            );
        }
    }
}

#[test]
fn shared_prefix_is_created_once_regardless_of_order() {
    for order in [["/a/b", "/a/c"], ["/a/c", "/a/b"]] {
        let fixture = Fixture::new();
        let report = fixture.reconcile(&fixture.declaration("users", &order));

        assert!(!report.has_failures());
        assert_eq!(
            fixture.gateway.paths(&fixture.api_id),
            vec!["/", "/a", "/a/b", "/a/c"]
        );
        assert_eq!(fixture.gateway.count_calls("create_resource"), 3);
        assert_eq!(report.already_present.resources, 1);
    }
}

#[test]
fn differently_named_parameter_becomes_a_sibling() {
    let fixture = Fixture::new();
    fixture.reconcile(&fixture.declaration("users", &["/items/{id}"]));

    let report = fixture.reconcile(&fixture.declaration("users", &["/items/{sku}"]));

    assert_eq!(report.created_resources.len(), 1);
    assert_eq!(report.created_resources[0].path, "/items/{sku}");
    assert_eq!(
        fixture.gateway.paths(&fixture.api_id),
        vec!["/", "/items", "/items/{id}", "/items/{sku}"]
    );
}

#[test]
fn routes_owned_by_other_modules_are_left_alone() {
    let fixture = Fixture::new();
    fixture.reconcile(&fixture.declaration("orders", &["/orders", "/orders/{id}"]));
    let orders_uri = fixture.target("orders").integration_uri();

    let report = fixture.reconcile(&fixture.declaration("users", &["/users"]));

    assert!(!report.has_failures());
    let method = fixture
        .gateway
        .method(&fixture.api_id, "/orders/{id}", HttpVerb::Get)
        .expect("orders method should remain");
    assert_eq!(method.integration_uri, Some(orders_uri));
    assert_eq!(
        fixture.gateway.paths(&fixture.api_id),
        vec!["/", "/orders", "/orders/{id}", "/users"]
    );
}

#[test]
fn declared_verbs_limit_method_bindings() {
    let fixture = Fixture::new();
    let declaration = route_sync_core::ModuleDeclaration::from_json(
        "users",
        "project-users",
        "inline",
        r#"[{"path": "/_health/users", "methods": ["GET"]}]"#,
    )
    .expect("declaration should load");

    let report = fixture.reconcile(&declaration);

    assert_eq!(report.created_methods.len(), 1);
    assert_eq!(report.outcomes[0].status, PathStatus::Converged);
    assert!(fixture
        .gateway
        .method(&fixture.api_id, "/_health/users", HttpVerb::Post)
        .is_none());
}

#[test]
fn existing_method_without_integration_only_gets_integration() {
    let fixture = Fixture::new();
    fixture
        .gateway
        .seed_method(&fixture.api_id, "/users", HttpVerb::Get, None);
    let declaration = route_sync_core::ModuleDeclaration::new(
        "users",
        "project-users",
        vec![route_sync_core::RouteDeclaration {
            path: "/users".to_string(),
            verbs: vec![HttpVerb::Get],
        }],
    );

    let report = fixture.reconcile(&declaration);

    assert!(report.created_methods.is_empty());
    assert_eq!(report.created_integrations.len(), 1);
    assert_eq!(report.already_present.methods, 1);
    assert_eq!(fixture.gateway.count_calls("put_method"), 0);
}

#[test]
fn invoke_grants_are_scoped_per_route() {
    let fixture = Fixture::new();
    fixture.reconcile(&fixture.declaration("users", &["/users", "/users/{id}"]));

    let mut source_arns: Vec<String> = fixture
        .functions
        .grants()
        .into_iter()
        .map(|grant| grant.source_arn)
        .collect();
    source_arns.sort();

    assert_eq!(
        source_arns,
        vec![
            format!("arn:aws:execute-api:us-east-1:123456789012:{}/*/*/users", fixture.api_id),
            format!("arn:aws:execute-api:us-east-1:123456789012:{}/*/*/users/*", fixture.api_id),
        ]
    );
}
