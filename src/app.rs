// app.rs
//
// Windowed viewer: a character capsule on a ground slab surrounded by
// crates, lit by a sun, a pair of orbiting point lights and a spot light,
// rendered through the deferred pipeline every frame.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::physics::{create_physics_body, BodyDebugMeshes, BodyShape, BodyStore, CharacterController, CharacterSettings};
use crate::renderer::device::{FillMode, GraphicsDevice};
use crate::renderer::lights::{Light, SpotCone};
use crate::renderer::material::{params, Material, MaterialId, MaterialLibrary, ParamValue};
use crate::renderer::{DeferredPipeline, FrameInput, WgpuDevice};
use crate::scene::{Camera, LightNode, VisibilityList};
use crate::settings::PipelineSettings;

const BODY_MATERIAL: MaterialId = MaterialId(1);
const CAMERA_OFFSET: Vec3 = Vec3::new(0.0, 4.0, 9.0);

/// Everything the viewer simulates and draws.
struct DemoScene {
    materials: MaterialLibrary,
    bodies: BodyStore,
    character: CharacterController,
    debug_meshes: BodyDebugMeshes,
    camera: Camera,
    elapsed: f32,
}

impl DemoScene {
    fn new() -> Self {
        let mut materials = MaterialLibrary::new();
        materials.insert(
            Material::new(BODY_MATERIAL, "Body")
                .with(params::DIFFUSE_COLOR, ParamValue::Color([0.8, 0.78, 0.74, 1.0]))
                .with(params::SPECULAR_COLOR, ParamValue::Color([0.3, 0.3, 0.3, 1.0]))
                .with(params::SPECULAR_POWER, ParamValue::Float(24.0)),
        );

        let mut bodies = BodyStore::new().with_ground(0.0);
        create_physics_body(
            &mut bodies,
            BodyShape::Box {
                half_extents: Vec3::new(20.0, 0.05, 20.0),
            },
            0.0,
            Vec3::new(0.0, -0.05, 0.0),
        );
        for (i, x) in [-4.0f32, -1.5, 2.0, 4.5].into_iter().enumerate() {
            let size = 0.4 + 0.2 * i as f32;
            create_physics_body(
                &mut bodies,
                BodyShape::Box {
                    half_extents: Vec3::splat(size),
                },
                0.0,
                Vec3::new(x, size, -3.0 + i as f32),
            );
        }
        let body = create_physics_body(
            &mut bodies,
            BodyShape::Capsule {
                radius: 0.4,
                half_height: 0.5,
            },
            70.0,
            Vec3::new(0.0, 0.9, 2.0),
        );

        Self {
            materials,
            bodies,
            character: CharacterController::new(body, CharacterSettings::default()),
            debug_meshes: BodyDebugMeshes::new(BODY_MATERIAL),
            camera: Camera::default(),
            elapsed: 0.0,
        }
    }

    fn update(&mut self, dt: f32, keys: &HeldKeys) {
        self.elapsed += dt;

        let mut movement = Vec3::ZERO;
        if keys.held(KeyCode::KeyW) {
            movement.z -= 1.0;
        }
        if keys.held(KeyCode::KeyS) {
            movement.z += 1.0;
        }
        if keys.held(KeyCode::KeyA) {
            movement.x -= 1.0;
        }
        if keys.held(KeyCode::KeyD) {
            movement.x += 1.0;
        }
        self.character.set_movement(movement);
        self.character.set_run(keys.held(KeyCode::ShiftLeft));
        self.character.set_creep(keys.held(KeyCode::ControlLeft));
        if keys.held(KeyCode::Space) {
            self.character.jump(&mut self.bodies);
        }

        if let Err(err) = self.character.update(&mut self.bodies, dt) {
            log::warn!("Character update failed: {}", err);
        }
        self.bodies.step(dt);

        match self.character.transform(&self.bodies) {
            Ok(transform) => {
                let position = transform.w_axis.truncate();
                self.camera.target = position;
                self.camera.eye = position + CAMERA_OFFSET;
            }
            Err(err) => log::warn!("Character transform unavailable: {}", err),
        }
    }

    fn lights(&self) -> Vec<Light> {
        let orbit = |phase: f32| {
            let angle = self.elapsed * 0.7 + phase;
            Vec3::new(angle.cos() * 5.0, 1.5, angle.sin() * 5.0)
        };
        vec![
            Light::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::new(1.0, 0.95, 0.85)).with_intensity(0.8),
            Light::point(orbit(0.0), Vec3::new(1.0, 0.4, 0.2), 7.0).with_intensity(2.0),
            Light::point(orbit(std::f32::consts::PI), Vec3::new(0.2, 0.5, 1.0), 7.0).with_intensity(2.0),
            Light::spot(
                Vec3::new(0.0, 6.0, 0.0),
                Vec3::NEG_Y,
                Vec3::ONE,
                12.0,
                SpotCone {
                    smooth: true,
                    ..SpotCone::default()
                },
            )
            .with_intensity(1.5),
        ]
    }

    fn collect(&mut self, device: &mut dyn GraphicsDevice, aspect: f32, out: &mut VisibilityList) {
        self.debug_meshes
            .collect(device, &self.bodies, &self.camera, aspect, out);
        for light in self.lights() {
            out.push_light(LightNode::new(light, &self.camera));
        }
    }
}

#[derive(Default)]
struct HeldKeys(HashSet<KeyCode>);

impl HeldKeys {
    fn held(&self, key: KeyCode) -> bool {
        self.0.contains(&key)
    }

    fn set(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.0.insert(key);
        } else {
            self.0.remove(&key);
        }
    }
}

struct Viewer {
    window: Arc<Window>,
    device: WgpuDevice,
    pipeline: DeferredPipeline,
    scene: DemoScene,
    last_frame: Instant,
}

impl Viewer {
    fn render(&mut self, settings: &PipelineSettings, keys: &HeldKeys) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;

        self.scene.update(dt, keys);

        let (width, height) = self.device.viewport_size();
        let aspect = width as f32 / height.max(1) as f32;
        let mut visibility = VisibilityList::new();
        self.scene.collect(&mut self.device, aspect, &mut visibility);

        let stats = self.pipeline.render(
            &mut self.device,
            settings,
            FrameInput {
                visibility: &visibility,
                materials: &self.scene.materials,
                camera: &self.scene.camera,
                shadows: None,
                delta_time: dt,
            },
        );
        log::trace!(
            "Frame: {} batches, {} lights, post {:?}",
            stats.gbuffer.batches,
            stats.lighting.drawn,
            stats.post.applied
        );
    }

    fn release(&mut self) {
        self.pipeline.release(&mut self.device);
        self.scene.debug_meshes.release(&mut self.device);
    }
}

pub struct App {
    settings: PipelineSettings,
    viewer: Option<Viewer>,
    keys: HeldKeys,
    wireframe: bool,
}

impl App {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            viewer: None,
            keys: HeldKeys::default(),
            wireframe: false,
        }
    }

    fn toggle_wireframe(&mut self) {
        self.wireframe = !self.wireframe;
        let fill = if self.wireframe {
            FillMode::Wireframe
        } else {
            FillMode::Solid
        };
        self.settings.begin.fill_mode = fill;
        log::info!("Fill mode: {:?}", fill);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }

        let window = match event_loop.create_window(Window::default_attributes().with_title("Deferred viewer")) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        let device = match pollster::block_on(WgpuDevice::new(window.clone(), true)) {
            Ok(device) => device,
            Err(err) => {
                log::error!("Failed to initialise the graphics device: {}", err);
                event_loop.exit();
                return;
            }
        };

        window.request_redraw();
        self.viewer = Some(Viewer {
            window,
            device,
            pipeline: DeferredPipeline::new(),
            scene: DemoScene::new(),
            last_frame: Instant::now(),
        });
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        if id != viewer.window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                viewer.device.resize(size.width, size.height);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = viewer.window.inner_size();
                viewer.device.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                viewer.render(&self.settings, &self.keys);
                viewer.window.request_redraw();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => match (code, state) {
                (KeyCode::Escape, ElementState::Pressed) => event_loop.exit(),
                (KeyCode::KeyF, ElementState::Pressed) if !repeat => self.toggle_wireframe(),
                (code, state) => self.keys.set(code, state == ElementState::Pressed),
            },
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut viewer) = self.viewer.take() {
            viewer.release();
        }
    }
}
