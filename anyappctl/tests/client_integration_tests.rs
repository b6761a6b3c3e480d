//! Client integration tests against the in-process mock daemon

use anyapp_core::{
    AnyApplication, AnyApplicationSpec, ApplicationId, ApplicationMatcherSpec, GlobalState,
    HelmSelectorSpec, PlacementStrategy, PlacementStrategySpec,
};
use anyappctl::client::{AnyAppClient, ClientError};
use anyappctl::test_utils::{MockServer, MOCK_ZONE};
use anyhow::Result;
use std::time::Duration;

fn client(url: &str) -> AnyAppClient {
    AnyAppClient::with_config(url.to_string(), 5, 1, Duration::from_millis(50)).unwrap()
}

fn nginx(name: &str, strategy: PlacementStrategy) -> AnyApplication {
    AnyApplication::new(
        "default",
        name,
        AnyApplicationSpec {
            application: ApplicationMatcherSpec {
                helm: Some(HelmSelectorSpec {
                    repository: "https://charts.example.com".to_string(),
                    chart: "nginx".to_string(),
                    version: "1.0.0".to_string(),
                    ..HelmSelectorSpec::default()
                }),
                ..ApplicationMatcherSpec::default()
            },
            placement_strategy: PlacementStrategySpec { strategy },
            ..AnyApplicationSpec::default()
        },
    )
}

#[tokio::test]
async fn test_info_and_health() -> Result<()> {
    let (_server, url) = MockServer::new().start().await?;
    let client = client(&url);

    let info = client.get_info().await?;
    assert_eq!(info.zone, MOCK_ZONE);
    assert_eq!(info.applications, 0);

    assert!(client.ping().await?);
    let health = client.health_check().await?;
    assert_eq!(health["connected"], true);
    assert_eq!(health["api_working"], true);
    assert_eq!(health["zone"], MOCK_ZONE);
    Ok(())
}

#[tokio::test]
async fn test_apply_creates_then_updates() -> Result<()> {
    let (_server, url) = MockServer::new().start().await?;
    let client = client(&url);
    let app = nginx("web", PlacementStrategy::Local);

    let (stored, created) = client.apply_application(&app).await?;
    assert!(created);
    assert_eq!(stored.metadata.resource_version, 1);

    let mut changed = app.clone();
    changed.spec.zones = 2;
    let (stored, created) = client.apply_application(&changed).await?;
    assert!(!created);
    assert_eq!(stored.spec.zones, 2);
    assert_eq!(stored.metadata.resource_version, 2);

    let listed = client.list_applications().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].chart, "nginx");
    Ok(())
}

#[tokio::test]
async fn test_http_errors_are_readable() -> Result<()> {
    let (_server, url) = MockServer::new().start().await?;
    let client = client(&url);
    let id = ApplicationId::new("default", "ghost");

    let err = client.get_application(&id).await.unwrap_err();
    assert!(ClientError::is_not_found(&err));
    assert!(err.to_string().contains("not found"), "{}", err);

    let app = nginx("web", PlacementStrategy::Local);
    client.create_application(&app).await?;
    let err = client.create_application(&app).await.unwrap_err();
    let status = err.downcast_ref::<ClientError>().map(ClientError::status);
    assert_eq!(status, Some(reqwest::StatusCode::CONFLICT));
    assert!(err.to_string().contains("conflict"), "{}", err);
    Ok(())
}

#[tokio::test]
async fn test_placements_and_ownership() -> Result<()> {
    let owned_elsewhere = {
        let mut app = nginx("db", PlacementStrategy::Local);
        app.status.owner = "zone-other".to_string();
        app.status.state = GlobalState::Operational;
        app
    };
    let (_server, url) = MockServer::new()
        .with_application(nginx("web", PlacementStrategy::Global))
        .await
        .with_application(owned_elsewhere)
        .await
        .start()
        .await?;
    let client = client(&url);

    let web = ApplicationId::new("default", "web");
    let placed = client
        .set_placements(&web, vec!["zone-a".to_string(), "zone-b".to_string()])
        .await?;
    assert_eq!(placed.status.placement_zones(), vec!["zone-a", "zone-b"]);

    let db = ApplicationId::new("default", "db");
    let err = client
        .set_placements(&db, vec!["zone-a".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bad request"), "{}", err);

    let requested = client.take_ownership(&db).await?;
    assert_eq!(requested.status.owner, "zone-other");
    assert!(requested.status.status_for(MOCK_ZONE).is_some());
    Ok(())
}

#[tokio::test]
async fn test_reports_and_events() -> Result<()> {
    let (_server, url) = MockServer::new().start().await?;
    let client = client(&url);
    let app = nginx("web", PlacementStrategy::Local);
    client.create_application(&app).await?;

    let id = app.id();
    let report = client.status_report(&id).await?;
    assert_eq!(report.zone, MOCK_ZONE);
    let spec = client.spec_report(&id).await?;
    assert_eq!(spec.name, "web");

    let events = client.events(&id, Some(1)).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "Created");

    client.delete_application(&id).await?;
    assert!(client.status_report(&id).await.is_err());
    Ok(())
}
