//! End-to-end tests over a real WebSocket connection.

use futures_util::{SinkExt, StreamExt};
use sawari_protocol::{codec, ClientFrame, DriverStatus, ServerFrame};
use sawari_server::config::Config;
use sawari_server::handlers::{self, AppState};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spin up a hub on an ephemeral port and return its WebSocket URL.
async fn start_hub() -> String {
    let config = Config::default();
    let state = AppState::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(handlers::serve(listener, state));
    format!("ws://{}/ws", addr)
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut Ws, frame: &ClientFrame) {
    let data = codec::encode(frame).unwrap();
    ws.send(Message::Binary(data.to_vec())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Binary(data) = msg {
            return codec::decode(&data).unwrap();
        }
    }
}

fn driver_location(lat: f64, lng: f64) -> ClientFrame {
    ClientFrame::DriverLocation {
        lat,
        lng,
        status: DriverStatus::Active,
    }
}

#[tokio::test]
async fn drivers_get_sequential_numbers_and_shared_view() {
    let url = start_hub().await;

    let mut driver_a = connect(&url).await;
    send(&mut driver_a, &driver_location(24.86, 67.0)).await;

    assert_eq!(recv(&mut driver_a).await, ServerFrame::AssignNumber { number: 1 });
    match recv(&mut driver_a).await {
        ServerFrame::DriversUpdate { drivers } => assert_eq!(drivers.len(), 1),
        other => panic!("Expected drivers-update, got {:?}", other),
    }

    let mut driver_b = connect(&url).await;
    send(&mut driver_b, &driver_location(24.90, 67.1)).await;

    assert_eq!(recv(&mut driver_b).await, ServerFrame::AssignNumber { number: 2 });

    // Both drivers converge on a two-entry view with numbers 1 and 2.
    for ws in [&mut driver_a, &mut driver_b] {
        match recv(ws).await {
            ServerFrame::DriversUpdate { drivers } => {
                let mut numbers: Vec<u32> = drivers.values().map(|d| d.number).collect();
                numbers.sort_unstable();
                assert_eq!(numbers, vec![1, 2]);
            }
            other => panic!("Expected drivers-update, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn ride_request_event_then_snapshot_then_stop() {
    let url = start_hub().await;

    let mut student = connect(&url).await;
    send(&mut student, &ClientFrame::StartRequest { lat: 10.0, lng: 20.0 }).await;

    let id = match recv(&mut student).await {
        ServerFrame::StudentRequest { id, lat, lng, expiry } => {
            assert_eq!(lat, 10.0);
            assert_eq!(lng, 20.0);
            assert!(expiry > 0);
            id
        }
        other => panic!("Expected student-request, got {:?}", other),
    };

    match recv(&mut student).await {
        ServerFrame::StudentsUpdate { students } => {
            assert_eq!(students.len(), 1);
            assert_eq!(students[0].id, id);
        }
        other => panic!("Expected students-update, got {:?}", other),
    }

    send(&mut student, &ClientFrame::StopRequest).await;

    assert_eq!(recv(&mut student).await, ServerFrame::StudentStopRequest { id });
    match recv(&mut student).await {
        ServerFrame::StudentsUpdate { students } => assert!(students.is_empty()),
        other => panic!("Expected students-update, got {:?}", other),
    }
}

#[tokio::test]
async fn new_driver_receives_requests_already_in_flight() {
    let url = start_hub().await;

    let mut student = connect(&url).await;
    send(&mut student, &ClientFrame::StartRequest { lat: 10.0, lng: 20.0 }).await;
    recv(&mut student).await; // student-request
    recv(&mut student).await; // students-update

    let mut driver = connect(&url).await;
    send(&mut driver, &driver_location(24.86, 67.0)).await;

    let mut got_number = false;
    let mut got_existing = false;
    let mut got_drivers = false;
    for _ in 0..3 {
        match recv(&mut driver).await {
            ServerFrame::AssignNumber { number } => {
                assert_eq!(number, 1);
                got_number = true;
            }
            ServerFrame::ExistingRequests { requests } => {
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].lat, 10.0);
                got_existing = true;
            }
            ServerFrame::DriversUpdate { drivers } => {
                assert_eq!(drivers.len(), 1);
                got_drivers = true;
            }
            other => panic!("Unexpected frame {:?}", other),
        }
    }
    assert!(got_number && got_existing && got_drivers);
}

#[tokio::test]
async fn requesting_student_disconnect_notifies_watchers() {
    let url = start_hub().await;

    let mut driver = connect(&url).await;
    send(&mut driver, &driver_location(24.86, 67.0)).await;
    recv(&mut driver).await; // assign-number
    recv(&mut driver).await; // drivers-update

    let mut student = connect(&url).await;
    send(&mut student, &ClientFrame::StartRequest { lat: 10.0, lng: 20.0 }).await;

    let id = match recv(&mut driver).await {
        ServerFrame::StudentRequest { id, .. } => id,
        other => panic!("Expected student-request, got {:?}", other),
    };
    recv(&mut driver).await; // students-update

    drop(student);

    assert_eq!(
        recv(&mut driver).await,
        ServerFrame::StudentStopRequest { id }
    );
    match recv(&mut driver).await {
        ServerFrame::StudentsUpdate { students } => assert!(students.is_empty()),
        other => panic!("Expected students-update, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_frame_is_dropped_without_killing_the_connection() {
    let url = start_hub().await;

    let mut driver = connect(&url).await;

    // Garbage payload with a plausible length prefix.
    let mut garbage = vec![0u8, 0, 0, 4];
    garbage.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
    driver.send(Message::Binary(garbage)).await.unwrap();

    // The connection is still usable.
    send(&mut driver, &driver_location(24.86, 67.0)).await;
    assert_eq!(recv(&mut driver).await, ServerFrame::AssignNumber { number: 1 });
}
