//! End-to-end tests of the gateway channel: a real controller served over an
//! in-process duplex transport, driven through the typed client, with state
//! pushes observed on the client's mirror.

use std::sync::Arc;
use std::time::Duration;

use hearth_core::LlmController;
use hearth_core::engine::ResponseChunk;
use hearth_core::engine::dev::DevEngineBackend;
use hearth_core::state::{Block, ChatItem, LlmState};
use hearth_core::store::prompts::{InMemoryPromptsRepository, PromptRecord, default_prompts};
use hearth_core::store::window_state::{InMemoryWindowStateRepository, WindowState};
use hearth_gateway::picker::{FixedPicker, ModelFilePicker, NoPicker};
use hearth_gateway::{GatewayClient, GatewayError, GatewayServer, duplex_pair};

struct Harness {
    backend: DevEngineBackend,
    controller: Arc<LlmController>,
    client: GatewayClient,
    _models_dir: tempfile::TempDir,
}

fn start(backend: DevEngineBackend, picker: Arc<dyn ModelFilePicker>) -> Harness {
    let models_dir = tempfile::tempdir().unwrap();
    let controller = Arc::new(
        LlmController::new(Arc::new(backend.clone()), models_dir.path().to_path_buf())
            .with_app_version("0.1.0-test"),
    );

    let server = GatewayServer::new(
        controller.clone(),
        picker,
        Arc::new(InMemoryPromptsRepository::new()),
        Arc::new(InMemoryWindowStateRepository::new()),
    );

    let (server_end, client_end) = duplex_pair();
    tokio::spawn(server.serve(server_end));
    let client = GatewayClient::connect(client_end);

    Harness {
        backend,
        controller,
        client,
        _models_dir: models_dir,
    }
}

async fn wait_for_mirror(
    client: &GatewayClient,
    predicate: impl Fn(&LlmState) -> bool,
) -> Arc<LlmState> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = client.state().get();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "mirror never reached the expected state"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_initial_snapshot_reaches_the_mirror() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let snapshot =
        wait_for_mirror(&harness.client, |s| s.app_version.is_some()).await;
    assert_eq!(snapshot.app_version.as_deref(), Some("0.1.0-test"));
}

#[tokio::test]
async fn test_get_state_returns_the_backend_snapshot() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let state = harness.client.get_state().await.unwrap();

    assert_eq!(state.app_version.as_deref(), Some("0.1.0-test"));
    assert!(!state.engine.loaded);
    assert!(!state.chat_session.loaded);
}

#[tokio::test]
async fn test_prompt_round_trip_streams_into_the_mirror() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));
    harness.backend.push_turn(vec![
        ResponseChunk::Text {
            text: "Hel".to_string(),
        },
        ResponseChunk::Text {
            text: "lo".to_string(),
        },
    ]);

    harness
        .client
        .load_model_from_local("tiny-1b-q4_0.gguf")
        .await
        .unwrap();
    wait_for_mirror(&harness.client, |s| s.chat_session.loaded).await;

    harness.client.prompt("hi").await.unwrap();

    let expected_transcript = vec![
        ChatItem::User {
            message: "hi".to_string(),
        },
        ChatItem::Model {
            blocks: vec![Block::Text {
                text: "Hello".to_string(),
            }],
        },
    ];

    let state = harness.client.get_state().await.unwrap();
    assert!(!state.chat_session.generating_result);
    assert_eq!(state.chat_session.transcript, expected_transcript);

    // The same transcript arrives by push, with no merge logic involved.
    let mirrored = wait_for_mirror(&harness.client, |s| {
        s.chat_session.transcript == expected_transcript
    })
    .await;
    assert!(!mirrored.chat_session.generating_result);
}

#[tokio::test]
async fn test_stop_active_prompt_lands_while_prompt_is_in_flight() {
    let backend = DevEngineBackend::new().with_chunk_delay(Duration::from_secs(600));
    backend.push_turn(vec![ResponseChunk::Text {
        text: "never delivered".to_string(),
    }]);
    let harness = start(backend, Arc::new(NoPicker));

    harness
        .client
        .load_model_from_local("tiny-1b-q4_0.gguf")
        .await
        .unwrap();
    wait_for_mirror(&harness.client, |s| s.chat_session.loaded).await;

    let prompt_client = harness.controller.clone();
    let prompt_task = tokio::spawn(async move { prompt_client.prompt("long task").await });

    wait_for_mirror(&harness.client, |s| s.chat_session.generating_result).await;
    harness.client.stop_active_prompt().await.unwrap();

    prompt_task.await.unwrap().unwrap();

    let state = wait_for_mirror(&harness.client, |s| !s.chat_session.generating_result).await;
    assert_eq!(
        state.chat_session.transcript,
        vec![ChatItem::User {
            message: "long task".to_string()
        }]
    );
}

#[tokio::test]
async fn test_unknown_method_surfaces_as_remote_error() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let result = harness
        .client
        .call("renameModel", serde_json::json!([]))
        .await;

    match result {
        Err(GatewayError::Remote(message)) => {
            assert!(message.contains("unknown method"), "got: {message}")
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_precondition_violation_propagates_to_the_caller() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let result = harness.client.prompt("hi").await;

    match result {
        Err(GatewayError::Remote(message)) => {
            assert!(message.contains("not loaded"), "got: {message}")
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_select_model_file_and_load_uses_the_picker() {
    let picker = Arc::new(FixedPicker::new("picked-3b-q4_k_m.gguf".into()));
    let harness = start(DevEngineBackend::new(), picker);

    harness.client.select_model_file_and_load().await.unwrap();

    let state = wait_for_mirror(&harness.client, |s| s.chat_session.loaded).await;
    assert_eq!(
        state.selected_model_file_path.as_deref(),
        Some("picked-3b-q4_k_m.gguf")
    );
    assert_eq!(state.model.name.as_deref(), Some("Picked 3B (Q4_K_M)"));
}

#[tokio::test]
async fn test_cancelled_pick_is_a_noop() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    harness.client.select_model_file_and_load().await.unwrap();

    let state = harness.client.get_state().await.unwrap();
    assert!(state.selected_model_file_path.is_none());
    assert!(!state.model.loaded);
}

#[tokio::test]
async fn test_prompt_library_round_trips_over_the_channel() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let initial = harness.client.load_prompts().await.unwrap();
    assert_eq!(initial, default_prompts());

    let custom = vec![PromptRecord::new("Terse", "Answer in one sentence.")];
    harness.client.save_prompts(&custom).await.unwrap();

    let loaded = harness.client.load_prompts().await.unwrap();
    assert_eq!(loaded, custom);
}

#[tokio::test]
async fn test_window_state_round_trips_over_the_channel() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let initial = harness.client.get_window_state().await.unwrap();
    assert_eq!(initial, WindowState::default());

    let moved = WindowState {
        x: Some(10),
        y: Some(12),
        width: 1500,
        height: 950,
        is_maximized: false,
    };
    harness.client.save_window_state(&moved).await.unwrap();

    assert_eq!(harness.client.get_window_state().await.unwrap(), moved);
}

#[tokio::test]
async fn test_recommended_model_is_served() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    let model = harness.client.get_recommended_model().await.unwrap();

    assert!(!model.files.is_empty());
    assert!(model.files[0].filename.ends_with(".gguf"));
}

#[tokio::test]
async fn test_unload_resets_the_mirror() {
    let harness = start(DevEngineBackend::new(), Arc::new(NoPicker));

    harness
        .client
        .load_model_from_local("tiny-1b-q4_0.gguf")
        .await
        .unwrap();
    wait_for_mirror(&harness.client, |s| s.chat_session.loaded).await;

    harness.client.unload_model().await.unwrap();

    let state = wait_for_mirror(&harness.client, |s| !s.model.loaded).await;
    assert!(state.selected_model_file_path.is_none());
    assert!(!state.context.loaded);
    assert!(!state.context_sequence.loaded);
    assert!(!state.chat_session.loaded);
}
