use assert_matches::assert_matches;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::*;
use shared_database::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

async fn directory(server: &MockServer) -> SupabasePatientDirectory {
    let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
    SupabasePatientDirectory::new(SupabaseClient::new(&config))
}

#[tokio::test]
async fn finds_a_registered_patient() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient_id)))
        .and(header("apikey", "test-anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockSupabaseResponses::patient_response(
            &patient_id.to_string(),
            "Ana",
            "Silva",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let found = directory(&server).await.find_patient(patient_id).await.unwrap().unwrap();
    assert_eq!(found.id, patient_id);
    assert_eq!(found.full_name().as_deref(), Some("Ana Silva"));
}

#[tokio::test]
async fn unknown_patient_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockSupabaseResponses::empty_response()))
        .mount(&server)
        .await;

    assert_eq!(directory(&server).await.find_patient(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn registry_outage_is_an_infrastructure_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(MockSupabaseResponses::error_response("upstream down", "PGRST000")),
        )
        .mount(&server)
        .await;

    let err = directory(&server).await.find_patient(Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_infrastructure());
    assert_matches!(err, SchedulingError::PatientDirectory(_));
}
