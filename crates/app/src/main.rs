//! vkcrt - compute ray tracing presented through Vulkan.
//!
//! Each frame a compute shader renders the scene into a shared buffer or
//! storage image, and a graphics pass draws that into the swapchain.

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use vkcrt_core::{FrameTimer, RenderConfig};
use vkcrt_platform::{AppCommand, Window, command_for_key};
use vkcrt_renderer::{FailureClass, RenderError, Renderer};

use crate::cli::Cli;

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Running,
    /// Window closed, Escape pressed or frame limit reached.
    Finished,
    SetupFailed,
    SurfaceGone,
    Fatal,
}

impl Outcome {
    fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Running | Outcome::Finished | Outcome::SurfaceGone => ExitCode::SUCCESS,
            Outcome::Fatal => ExitCode::from(1),
            Outcome::SetupFailed => ExitCode::from(2),
        }
    }

    fn from_frame_error(err: &RenderError) -> Self {
        if err.is_surface_gone() {
            Outcome::SurfaceGone
        } else {
            Outcome::Fatal
        }
    }
}

/// Failure class of a setup error, looking through the anyhow wrapper.
fn setup_failure_class(err: &anyhow::Error) -> FailureClass {
    err.downcast_ref::<RenderError>()
        .map_or(FailureClass::Other, RenderError::failure_class)
}

struct App {
    config: RenderConfig,
    // Declared before the window so it is dropped first.
    renderer: Option<Renderer>,
    window: Option<Window>,
    timer: FrameTimer,
    outcome: Outcome,
}

impl App {
    fn new(config: RenderConfig) -> Self {
        let timer = FrameTimer::new(config.stats_interval);
        Self {
            config,
            renderer: None,
            window: None,
            timer,
            outcome: Outcome::Running,
        }
    }

    fn stop(&mut self, event_loop: &ActiveEventLoop, outcome: Outcome) {
        if self.outcome == Outcome::Running {
            self.outcome = outcome;
        }
        event_loop.exit();
    }

    fn setup(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let title = format!("vkcrt ({})", self.config.variant);
        let window = Window::new(event_loop, self.config.width, self.config.height, &title)?;
        let renderer = Renderer::new(&window, &self.config)?;

        window.show();
        window.request_redraw();
        info!("Initialization complete, entering main loop");

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn draw_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let result = renderer.draw_next_frame().and_then(|report| {
            renderer.wait_idle()?;
            Ok(report)
        });

        match result {
            Ok(report) => {
                if report.suboptimal {
                    warn!("Frame {} presented to a suboptimal swapchain", report.frame);
                }
                if let Some(stats) = self.timer.frame() {
                    info!(
                        "{} frames: {:.1} fps ({:.3} ms/frame)",
                        stats.total_frames,
                        stats.fps(),
                        stats.frame_time_ms()
                    );
                }
                if self.config.limit_reached(renderer.frames_presented()) {
                    info!("Frame limit of {} reached", renderer.frames_presented());
                    self.stop(event_loop, Outcome::Finished);
                }
            }
            Err(e) => {
                let outcome = Outcome::from_frame_error(&e);
                if outcome == Outcome::SurfaceGone {
                    warn!("Stopping: {}", e);
                } else {
                    error!("Stopping on fatal error: {}", e);
                }
                self.stop(event_loop, outcome);
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            let tracker = renderer.tracker().clone();
            drop(renderer);
            let leaked = tracker.report_leaks();
            if leaked > 0 {
                error!("{} Vulkan object(s) outlived the renderer", leaked);
            }
        }
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.outcome != Outcome::Running {
            return;
        }
        if let Err(e) = self.setup(event_loop) {
            error!("Setup failed [{}]: {:#}", setup_failure_class(&e), e);
            self.stop(event_loop, Outcome::SetupFailed);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.stop(event_loop, Outcome::Finished);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key
                    && command_for_key(code, event.state) == Some(AppCommand::Quit)
                {
                    info!("Escape pressed, shutting down");
                    self.stop(event_loop, Outcome::Finished);
                }
            }
            WindowEvent::RedrawRequested => {
                if self.outcome == Outcome::Running {
                    self.draw_frame(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.outcome == Outcome::Running
            && let Some(ref window) = self.window
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}

fn main() -> Result<ExitCode> {
    vkcrt_core::init_logging();
    let cli = Cli::parse();
    let config = cli.resolve()?;
    info!(
        "Starting vkcrt: {} variant, {}x{}, validation {}",
        config.variant,
        config.width,
        config.height,
        if config.validation { "on" } else { "off" }
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    app.teardown();

    info!("Exiting with {:?}", app.outcome);
    Ok(app.outcome.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_errors_map_to_outcomes() {
        let gone = RenderError::SurfaceGone(ash::vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(Outcome::from_frame_error(&gone), Outcome::SurfaceGone);
        assert_eq!(Outcome::from_frame_error(&RenderError::Terminal), Outcome::Fatal);
        assert_eq!(Outcome::from_frame_error(&RenderError::RecordBeforeFence), Outcome::Fatal);
    }

    #[test]
    fn test_setup_failure_class_sees_through_anyhow() {
        let err = anyhow::Error::new(RenderError::SurfaceGone(ash::vk::Result::ERROR_SURFACE_LOST_KHR));
        assert_eq!(setup_failure_class(&err), FailureClass::SurfaceGone);

        let err = anyhow::Error::new(vkcrt_core::Error::Window("no display".into()));
        assert_eq!(setup_failure_class(&err), FailureClass::Other);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Finished.exit_code(), ExitCode::SUCCESS);
        assert_eq!(Outcome::SurfaceGone.exit_code(), ExitCode::SUCCESS);
        assert_eq!(Outcome::Fatal.exit_code(), ExitCode::from(1));
        assert_eq!(Outcome::SetupFailed.exit_code(), ExitCode::from(2));
    }
}
