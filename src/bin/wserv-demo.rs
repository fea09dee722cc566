//! wserv demo
//!
//! Stands up a window server, connects two scripted sessions and walks them
//! through the creation, focus and notification paths, logging as it goes.
//! Useful for eyeballing dispatch behavior without a guest attached.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wserv::ipc::{EventSink, NotifyInfo, RequestContext};
use wserv::ws::common::{EventControl, EventModifiers, Vec2};
use wserv::ws::notifiers::ModNotifier;
use wserv::ws::ops::{self, ClientOp, CmdHeader, WsCmd};
use wserv::WindowServer;

/// Prints completions instead of waking a guest thread.
struct LoggingSink(&'static str);

impl EventSink for LoggingSink {
    fn notify(&self, status: i32) {
        info!("[{}] listener completed with status {}", self.0, status);
    }
}

struct PrintContext(&'static str);

impl RequestContext for PrintContext {
    fn complete(&mut self, status: i32) {
        info!("[{}] request completed with {}", self.0, status);
    }
}

fn pod_cmd<T: bytemuck::Pod>(op: ClientOp, obj_handle: u32, payload: &T) -> Vec<u8> {
    let bytes = bytemuck::bytes_of(payload);
    let mut out = Vec::new();
    out.extend_from_slice(bytemuck::bytes_of(&CmdHeader {
        op: op as u16,
        cmd_len: bytes.len() as u16,
        obj_handle,
    }));
    out.extend_from_slice(bytes);
    out
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("wsini.toml"));
    let server = WindowServer::new(config_path);
    info!("Server up with {} screen(s)", server.screen_count());

    let alice = server.connect(1);
    let bob = server.connect(2);

    // Alice: screen device + focused group, through the wire path.
    let buf = pod_cmd(
        ClientOp::CreateScreenDevice,
        0,
        &ops::CreateScreenDevice {
            screen_num: 0,
            client_ptr: 0,
        },
    );
    alice.parse_command_buffer(&server, &mut PrintContext("alice"), &buf);
    let buf = pod_cmd(
        ClientOp::CreateWindowGroup,
        0,
        &ops::CreateWindowGroup {
            client_handle: 1,
            focus: 1,
            parent_id: 0,
            screen_device_handle: 0,
        },
    );
    alice.parse_command_buffer(&server, &mut PrintContext("alice"), &buf);
    let group = alice.last_group().expect("group was just created");

    // A window under the fresh group, plus a queued redraw.
    let window_payload = ops::CreateWindow {
        parent_id: group,
        client_handle: 2,
        win_type: 0,
        display_mode: 0,
    };
    let window_cmd = WsCmd {
        header: CmdHeader {
            op: ClientOp::CreateWindow as u16,
            cmd_len: std::mem::size_of::<ops::CreateWindow>() as u16,
            obj_handle: 0,
        },
        payload: bytemuck::bytes_of(&window_payload),
    };
    let mut ctx = PrintContext("alice");
    alice.execute_command(&server, &mut ctx, &window_cmd);

    alice.add_redraw_listener(NotifyInfo::new(Arc::new(LoggingSink("alice/redraw")), 1));
    // Window handles allocate monotonically; the window is the group's successor.
    alice.queue_redraw(group + 1, Vec2::new(0, 0), Vec2::new(176, 208))?;

    // Bob subscribes to modifier changes, then a broadcast reaches him.
    let bob_buf = pod_cmd(
        ClientOp::CreateWindowGroup,
        0,
        &ops::CreateWindowGroup {
            client_handle: 1,
            focus: 0,
            parent_id: 0,
            screen_device_handle: 0,
        },
    );
    bob.parse_command_buffer(&server, &mut PrintContext("bob"), &bob_buf);
    let bob_group = bob.last_group().expect("group was just created");
    bob.add_mod_notifier(
        bob_group,
        ModNotifier {
            modifiers: EventModifiers::SHIFT | EventModifiers::CTRL,
            when: EventControl::Always,
        },
    )?;
    bob.add_event_listener(NotifyInfo::new(Arc::new(LoggingSink("bob/event")), 2));

    server.notify_mod_changed(EventModifiers::SHIFT, EventModifiers::SHIFT);
    while let Some(evt) = bob.next_event() {
        info!("bob fetched event {:?}", evt);
    }

    info!(
        "{} groups live, focus = {:?}",
        server.get_total_window_groups(),
        server.get_focus()
    );

    server.disconnect(1);
    server.disconnect(2);
    info!("Focus after teardown: {:?}", server.get_focus());
    Ok(())
}
