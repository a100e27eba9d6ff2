use glam::{Mat4, Vec3};
use std::time::{Duration, Instant};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

/// A left click shorter than this counts as a pick rather than an orbit drag.
pub const CLICK_DURATION: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct Camera {
    // --- Orbital Parameters (Primary State) ---
    /// The render-space point the camera orbits around.
    pub target: Vec3,
    /// Distance from the camera to the target.
    pub distance: f32,
    /// Azimuth angle around the +y axis (radians).
    pub azimuth_rad: f32,
    /// Elevation angle above the xz plane (radians).
    pub elevation_rad: f32,

    // --- Derived Properties (Updated by `update()`) ---
    /// Camera position in render space.
    position: Vec3,

    // --- Projection ---
    /// Vertical field of view (radians).
    pub fov_y: f32,
    pub aspect: f32,
    pub proj: Mat4,
}

impl Camera {
    pub const NEAR: f32 = 0.01;
    pub const FAR: f32 = 1000.0;

    /// Creates a camera looking at the origin from the front.
    pub fn new(aspect: f32) -> Self {
        let fov_y = 45f32.to_radians();
        let mut camera = Self {
            target: Vec3::ZERO,
            distance: 5.0,
            azimuth_rad: 0.0,
            elevation_rad: 0.0,
            position: Vec3::ZERO, // placeholder
            fov_y,
            aspect,
            proj: Mat4::perspective_rh(fov_y, aspect, Self::NEAR, Self::FAR),
        };

        camera.update();
        camera
    }

    /// Recalculates the eye position from the orbital parameters. Call after changing them.
    pub fn update(&mut self) {
        let (sin_az, cos_az) = self.azimuth_rad.sin_cos();
        let (sin_el, cos_el) = self.elevation_rad.sin_cos();
        let offset = Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az) * self.distance;
        self.position = self.target + offset;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
        self.proj = Mat4::perspective_rh(self.fov_y, aspect, Self::NEAR, Self::FAR);
    }

    /// Centres the orbit on `center` at the distance where `extent` fills the view.
    pub fn focus_on(&mut self, center: Vec3, extent: f32) {
        self.target = center;
        self.distance = Self::fit_distance(extent, self.fov_y);
        self.update();
    }

    /// Moves the orbit target, keeping direction and distance.
    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
        self.update();
    }

    /// Distance at which an object of size `extent` spans the vertical field of view.
    pub fn fit_distance(extent: f32, fov_y: f32) -> f32 {
        (extent / (2.0 * (0.5 * fov_y).tan())).max(Self::NEAR * 10.0)
    }

    #[inline]
    pub fn eye(&self) -> Vec3 {
        self.position
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, Vec3::Y)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view()
    }
}

pub struct CameraController {
    mouse_down: bool,
    last_mouse: Option<(f64, f64)>,
    pressed_at: Option<Instant>,
}

impl CameraController {
    pub fn new() -> Self {
        Self {
            mouse_down: false,
            last_mouse: None,
            pressed_at: None,
        }
    }

    /// Handles window events and updates the camera. Returns the cursor position of a
    /// completed short left click.
    pub fn handle_event(&mut self, event: &WindowEvent, camera: &mut Camera) -> Option<(f64, f64)> {
        match event {
            WindowEvent::MouseInput { button, state, .. } if *button == MouseButton::Left => {
                self.mouse_down = *state == ElementState::Pressed;
                if self.mouse_down {
                    self.pressed_at = Some(Instant::now());
                    return None;
                }
                let short = self
                    .pressed_at
                    .take()
                    .is_some_and(|t| t.elapsed() < CLICK_DURATION);
                if short {
                    return self.last_mouse;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor_orbit((position.x, position.y), camera);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 120.0,
                };

                self.handle_scroll(scroll, camera);
            }
            _ => {}
        }
        None
    }

    /// Adjusts the orbit distance based on scroll input.
    fn handle_scroll(&mut self, delta: f32, camera: &mut Camera) {
        // Positive delta = scroll up = zoom in.
        camera.distance *= 1.1_f32.powf(-delta);
        camera.distance = camera.distance.clamp(Camera::NEAR * 10.0, Camera::FAR * 0.5);
        camera.update();
    }

    /// Rotates the camera around the target while the left mouse button is held.
    fn handle_cursor_orbit(&mut self, xy: (f64, f64), camera: &mut Camera) {
        if let Some(last) = self.last_mouse {
            if self.mouse_down {
                let dx = ((xy.0 - last.0) * 0.005) as f32;
                let dy = ((xy.1 - last.1) * 0.005) as f32;

                camera.azimuth_rad -= dx;
                camera.elevation_rad += dy;

                // Keep away from the poles where look_at degenerates.
                camera.elevation_rad = camera
                    .elevation_rad
                    .clamp(-89f32.to_radians(), 89f32.to_radians());

                camera.update();
            }
        }
        self.last_mouse = Some(xy);
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_fits_extent_in_view() {
        let mut cam = Camera::new(1.0);
        cam.focus_on(Vec3::new(1.0, 2.0, 3.0), 2.0);
        assert_eq!(cam.target, Vec3::new(1.0, 2.0, 3.0));
        // half the extent subtends half the field of view
        let half_angle = (1.0 / cam.distance).atan();
        assert!((half_angle - 0.5 * cam.fov_y).abs() < 1e-5);
        assert!(((cam.eye() - cam.target).length() - cam.distance).abs() < 1e-4);
    }

    #[test]
    fn target_projects_to_screen_centre() {
        let mut cam = Camera::new(16.0 / 9.0);
        cam.azimuth_rad = 0.7;
        cam.elevation_rad = 0.3;
        cam.set_target(Vec3::new(0.5, 0.5, 0.5));
        let clip = cam.view_proj() * cam.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
