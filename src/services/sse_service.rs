use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::{caller::Caller, sse::ServerEvent},
    error::ServiceError,
    services::sse_events,
    state::{SharedState, room::RoomId},
};

/// Follow a room and stream a tailored snapshot to the caller on every change.
///
/// The stream also reports connectivity changes of the server's view and of the
/// degraded flag. A lagging client applies backpressure: the forwarder waits on the
/// bounded channel and folds intermediate views into the latest one, so only the
/// newest snapshot is delivered once the client catches up.
///
/// The stream owns everything it reads, so it outlives the borrowed state.
pub async fn room_stream(
    state: &SharedState,
    caller: Caller,
    room_id: RoomId,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let host = state.host_room(&room_id).await?;
    let mut observer = host.observer();
    let mut degraded = state.degraded_watcher();
    let state = state.clone();

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let viewer = caller.player_id().cloned();
        let mut pending: Vec<ServerEvent> = Vec::new();
        let flagged = *degraded.borrow_and_update();
        pending.extend(sse_events::handshake(&room_id, viewer.as_ref(), flagged));
        pending.extend(sse_events::room_view(
            &observer.current(),
            viewer.as_ref(),
            state.clock().now(),
            flagged,
        ));

        'forward: loop {
            for payload in pending.drain(..) {
                if tx.send(Ok(to_event(payload))).await.is_err() {
                    break 'forward;
                }
            }

            tokio::select! {
                _ = tx.closed() => break,
                changed = observer.changed() => {
                    let Ok(view) = changed else {
                        debug!(%room_id, "room view closed; ending stream");
                        break;
                    };
                    let flagged = *degraded.borrow();
                    pending.extend(sse_events::room_view(
                        &view,
                        viewer.as_ref(),
                        state.clock().now(),
                        flagged,
                    ));
                }
                changed = degraded.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let flagged = *degraded.borrow_and_update();
                    pending.extend(sse_events::system_status(flagged));
                }
            }
        }

        drop(observer);
        state.release_idle_room(&room_id);
        info!(%room_id, "room SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::response::IntoResponse;
    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::InMemoryRoomStore,
        state::{
            AppState,
            room::{Language, PlayerId, RoomRules},
        },
        sync::{Intent, StaticIdentity},
    };

    async fn open(
        state: SharedState,
        caller: Caller,
        room_id: RoomId,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        room_stream(&state, caller, room_id).await.unwrap()
    }

    #[tokio::test]
    async fn stream_outlives_its_request_and_holds_the_room_until_closed() {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(InMemoryRoomStore::new());
        state.set_room_store(store.clone()).await;

        let ada = PlayerId::parse("ada").unwrap();
        let room_id = RoomId::parse("streamed").unwrap();
        let admin = state
            .engine_builder(store, Arc::new(StaticIdentity::signed_in(ada.clone(), "Ada")), false)
            .create(
                Some(room_id.clone()),
                RoomRules {
                    rounds_total: 1,
                    time_per_round_seconds: 30,
                    categories: vec!["Animal".into()],
                    language: Language::En,
                    end_round_on_first_submit: false,
                },
            )
            .await
            .unwrap();
        admin.dispatch(Intent::Leave).await.unwrap();

        let sse = open(state.clone(), Caller::new(Some(ada), "Ada"), room_id.clone()).await;
        let mut body = sse.into_response().into_body().into_data_stream();
        let handshake = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&handshake).contains("event: handshake"));
        let snapshot = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&snapshot).contains("event: room"));

        assert!(!state.release_idle_room(&room_id));
        assert_eq!(state.hosted_rooms(), 1);

        drop(body);
        timeout(Duration::from_secs(1), async {
            while state.hosted_rooms() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
