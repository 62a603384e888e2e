// Presenter
// Ties frame arrival and paint events to render calls on the UI thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent as WinitWindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

use crate::frame::VideoFrame;
use crate::relay::{FrameRelay, FrameSink, RenderScheduler};
use crate::renderer::{RenderConfig, RenderSurface, RendererError};

/// Events from the viewer window
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    Resized(u32, u32),
    CloseRequested,
    Focused(bool),
}

/// Command to the viewer window
enum ViewerCommand {
    Render,
    SetTitle(String),
    Close,
}

/// Viewer window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub render: RenderConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            title: "Frameview".to_string(),
            width: 1280,
            height: 720,
            render: RenderConfig::default(),
        }
    }
}

/// Posts the relay's render callback into the UI thread's command queue.
struct WindowScheduler {
    command_tx: Sender<ViewerCommand>,
}

impl RenderScheduler for WindowScheduler {
    fn schedule_render(&self) {
        let _ = self.command_tx.send(ViewerCommand::Render);
    }
}

/// Take-draw-present state machine. Idle until a push marks a render
/// pending; rendering moves back to Idle by clearing the relay through
/// `take`. Runs exclusively on the UI thread.
pub struct Presenter {
    relay: Arc<FrameRelay>,
    surface: RenderSurface,
    /// Last frame taken, retained so paint events can redraw it even when
    /// nothing new arrived.
    current: Option<Arc<VideoFrame>>,
}

impl Presenter {
    /// Bind a render surface to `window`. Creation failures are reported
    /// here, synchronously; the caller stays non-rendering until it supplies
    /// a valid window again.
    pub fn init(
        window: Arc<Window>,
        relay: Arc<FrameRelay>,
        config: &RenderConfig,
    ) -> Result<Self, RendererError> {
        let surface = RenderSurface::create(window, config)?;
        Ok(Self {
            relay,
            surface,
            current: None,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    /// Render the newest frame, or repaint the held one.
    ///
    /// Per-frame failures drop the frame and keep the previously presented
    /// image; the pipeline resumes on the next frame or paint event.
    pub fn render(&mut self) {
        if let Some(frame) = self.relay.take() {
            match self.surface.render_frame(&frame) {
                Ok(()) => self.current = Some(frame),
                Err(e) => log::warn!("Dropping frame: {}", e),
            }
        } else if let Some(frame) = self.current.clone() {
            if let Err(e) = self.surface.render_frame(&frame) {
                log::warn!("Repaint failed: {}", e);
            }
        }
    }
}

/// Handle to the viewer window from other threads
#[derive(Clone)]
pub struct ViewerHandle {
    sink: FrameSink,
    command_tx: Sender<ViewerCommand>,
    event_rx: Receiver<ViewerEvent>,
    is_open: Arc<AtomicBool>,
}

impl ViewerHandle {
    /// Frame-delivery entry point for the decoder's callback.
    pub fn sink(&self) -> FrameSink {
        self.sink.clone()
    }

    pub fn set_title(&self, title: &str) -> Result<(), RendererError> {
        self.command_tx
            .send(ViewerCommand::SetTitle(title.to_string()))
            .map_err(|_| RendererError::WindowError("Failed to send command".to_string()))
    }

    pub fn close(&self) {
        let _ = self.command_tx.send(ViewerCommand::Close);
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }

    /// Try to receive a window event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ViewerEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive a window event (blocking)
    pub fn recv_event(&self) -> Option<ViewerEvent> {
        self.event_rx.recv().ok()
    }
}

/// Viewer window state, driven by the winit event loop on its own thread
pub struct ViewerWindow {
    config: ViewerConfig,
    command_rx: Receiver<ViewerCommand>,
    event_tx: Sender<ViewerEvent>,
    is_open: Arc<AtomicBool>,
    relay: Arc<FrameRelay>,
    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
}

impl ViewerWindow {
    /// Open the viewer window and return a handle to it. The event loop
    /// runs on a dedicated thread; that thread is the UI thread for every
    /// surface operation.
    pub fn open(config: ViewerConfig) -> Result<ViewerHandle, RendererError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let is_open = Arc::new(AtomicBool::new(true));
        let is_open_clone = is_open.clone();

        let relay = Arc::new(FrameRelay::new(Arc::new(WindowScheduler {
            command_tx: command_tx.clone(),
        })));
        let sink = FrameSink::new(relay.clone());

        std::thread::spawn(move || {
            let event_loop = EventLoop::new().expect("Failed to create event loop");
            event_loop.set_control_flow(ControlFlow::Poll);

            let mut app = ViewerWindow {
                config,
                command_rx,
                event_tx,
                is_open: is_open_clone,
                relay,
                window: None,
                presenter: None,
            };

            event_loop.run_app(&mut app).ok();
        });

        Ok(ViewerHandle {
            sink,
            command_tx,
            event_rx,
            is_open,
        })
    }

    fn process_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                ViewerCommand::Render => {
                    // The scheduled callback; the window may have been
                    // destroyed between scheduling and execution, so
                    // cancellation is this liveness check.
                    if let Some(ref window) = self.window {
                        window.request_redraw();
                    }
                }
                ViewerCommand::SetTitle(title) => {
                    if let Some(ref window) = self.window {
                        window.set_title(&title);
                    }
                }
                ViewerCommand::Close => {
                    self.is_open.store(false, Ordering::Relaxed);
                }
            }
        }
    }
}

impl ApplicationHandler for ViewerWindow {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.is_open.store(false, Ordering::Relaxed);
                event_loop.exit();
                return;
            }
        };

        match Presenter::init(window.clone(), self.relay.clone(), &self.config.render) {
            Ok(presenter) => {
                self.presenter = Some(presenter);
                log::info!(
                    "Viewer window created: {}x{}",
                    self.config.width,
                    self.config.height
                );
            }
            Err(e) => {
                // Remain non-rendering; no retry is attempted.
                log::error!("Failed to create render surface: {}", e);
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WinitWindowEvent,
    ) {
        match event {
            WinitWindowEvent::CloseRequested => {
                self.is_open.store(false, Ordering::Relaxed);
                let _ = self.event_tx.send(ViewerEvent::CloseRequested);
                event_loop.exit();
            }
            WinitWindowEvent::Resized(size) => {
                if let Some(ref mut presenter) = self.presenter {
                    presenter.resize(size.width, size.height);
                }
                let _ = self
                    .event_tx
                    .send(ViewerEvent::Resized(size.width, size.height));
            }
            WinitWindowEvent::Focused(focused) => {
                let _ = self.event_tx.send(ViewerEvent::Focused(focused));
            }
            WinitWindowEvent::RedrawRequested => {
                self.process_commands();

                // A paint redraws unconditionally, new frame or not.
                if let Some(ref mut presenter) = self.presenter {
                    presenter.render();
                }
            }
            _ => {}
        }

        if !self.is_open.load(Ordering::Relaxed) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.process_commands();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    #[test]
    fn test_scheduler_posts_one_render_per_pending_cycle() {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let relay = Arc::new(FrameRelay::new(Arc::new(WindowScheduler { command_tx })));
        let sink = FrameSink::new(relay.clone());

        let frame = || {
            Arc::new(VideoFrame::bgra(
                2,
                2,
                None,
                Plane::new(vec![0u8; 16], 8),
            ))
        };

        // A burst of pushes coalesces into one posted render command.
        for _ in 0..4 {
            sink.push(frame());
        }
        assert!(matches!(command_rx.try_recv(), Ok(ViewerCommand::Render)));
        assert!(command_rx.try_recv().is_err());

        // After a take the next push posts again.
        relay.take();
        sink.push(frame());
        assert!(matches!(command_rx.try_recv(), Ok(ViewerCommand::Render)));
    }

    #[test]
    fn test_viewer_config_default() {
        let config = ViewerConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.render.adapter_id, None);
    }
}
