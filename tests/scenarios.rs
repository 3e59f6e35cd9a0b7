//! Pass-level behaviour observed through full frames and the physics store.

use deferred_passes::physics::{create_physics_body, BodyShape, BodyStore, CharacterController, CharacterSettings, PhysicsWorld};
use deferred_passes::renderer::device::{
    BlendMode, ColorMask, ScissorRect, StencilState, TargetBinding, TargetDescriptor, TextureFormat,
};
use deferred_passes::renderer::material::{params, Material, MaterialId, MaterialLibrary};
use deferred_passes::renderer::passes::gbuffer::{
    material_features, GBufferFeatures, GBufferOverrides, GEOMETRY_STENCIL,
};
use deferred_passes::renderer::passes::AoTechniqueKind;
use deferred_passes::renderer::postprocess::{depth_blur_params, DofSettings};
use deferred_passes::renderer::{
    cube_mesh, upload_mesh, Command, DeferredPipeline, FrameInput, FrameStats, GraphicsDevice, HeadlessDevice, Light,
};
use deferred_passes::scene::{Camera, LightNode, MeshId, MeshNode, VisibilityList};
use deferred_passes::settings::PipelineSettings;
use glam::{Mat4, Vec3};

const WIDTH: u32 = 80;
const HEIGHT: u32 = 60;

struct Frame {
    device: HeadlessDevice,
    pipeline: DeferredPipeline,
    materials: MaterialLibrary,
    visibility: VisibilityList,
    camera: Camera,
}

impl Frame {
    /// One cube per material, diffuse-only first, diffuse plus normal second.
    fn new(lights: Vec<Light>) -> Self {
        let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
        let camera = Camera::default();
        let aspect = WIDTH as f32 / HEIGHT as f32;
        let texel = TargetDescriptor::new(1, 1, TextureFormat::Rgba8Unorm);
        let diffuse = device.create_texture("Diffuse", &texel, &[200; 4]).unwrap();
        let normal = device.create_texture("Normal", &texel, &[128, 128, 255, 255]).unwrap();
        let cube = upload_mesh(&mut device, "Cube", MeshId(1), &cube_mesh()).unwrap();

        let mut materials = MaterialLibrary::new();
        materials.insert(Material::new(MaterialId(1), "diffuse").with_texture(params::DIFFUSE_MAP, diffuse));
        materials.insert(
            Material::new(MaterialId(2), "bumpy")
                .with_texture(params::DIFFUSE_MAP, diffuse)
                .with_texture(params::NORMAL_MAP, normal),
        );

        let mut visibility = VisibilityList::new();
        visibility.push_mesh(MeshNode::new(cube, MaterialId(1), Mat4::IDENTITY, &camera, aspect));
        visibility.push_mesh(MeshNode::new(
            cube,
            MaterialId(2),
            Mat4::from_translation(Vec3::X),
            &camera,
            aspect,
        ));
        for light in lights {
            visibility.push_light(LightNode::new(light, &camera));
        }

        Self {
            device,
            pipeline: DeferredPipeline::new(),
            materials,
            visibility,
            camera,
        }
    }

    fn render(&mut self, settings: &PipelineSettings) -> FrameStats {
        self.pipeline.render(
            &mut self.device,
            settings,
            FrameInput {
                visibility: &self.visibility,
                materials: &self.materials,
                camera: &self.camera,
                shadows: None,
                delta_time: 1.0 / 60.0,
            },
        )
    }

    fn created_programs(&self, prefix: &str) -> usize {
        self.device
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::CreateProgram { label, .. } if label.starts_with(prefix)))
            .count()
    }
}

#[test]
fn diffuse_only_material_gets_its_own_variant() {
    let frame = Frame::new(Vec::new());
    let diffuse = frame.materials.get(MaterialId(1)).unwrap();
    let bumpy = frame.materials.get(MaterialId(2)).unwrap();
    assert_eq!(material_features(diffuse, GBufferOverrides::empty()), GBufferFeatures::DIFFUSE_MAP);
    assert_eq!(
        material_features(bumpy, GBufferOverrides::empty()),
        GBufferFeatures::DIFFUSE_MAP | GBufferFeatures::NORMAL_MAP
    );

    let mut frame = frame;
    frame.render(&PipelineSettings::default());
    let draws = frame.device.draws_with_program("gbuffer");
    assert_eq!(draws.len(), 2);
    assert_ne!(draws[0].program, draws[1].program);
    assert_eq!(frame.created_programs("gbuffer"), 2);
}

#[test]
fn inert_lights_issue_no_draws() {
    let mut frame = Frame::new(vec![
        Light::directional(Vec3::NEG_Y, Vec3::ZERO),
        Light::point(Vec3::ZERO, Vec3::ONE, 0.0),
        Light::spot(Vec3::Y, Vec3::NEG_Y, Vec3::ONE, -1.0, Default::default()),
    ]);
    let stats = frame.render(&PipelineSettings::default());

    assert_eq!(stats.lighting.considered, 3);
    assert_eq!(stats.lighting.culled, 3);
    assert_eq!(stats.lighting.drawn, 0);
    assert!(frame.device.draws_with_program("lighting").is_empty());
}

#[test]
fn off_screen_light_is_rejected_before_any_program_work() {
    // Well behind the default camera at z = 3
    let mut frame = Frame::new(vec![Light::point(Vec3::new(0.0, 0.0, 20.0), Vec3::ONE, 1.0)]);
    let stats = frame.render(&PipelineSettings::default());

    assert_eq!(stats.lighting.scissor_rejected, 1);
    assert!(frame.device.draws_with_program("lighting").is_empty());
    assert_eq!(frame.created_programs("lighting"), 0);
}

#[test]
fn directional_light_draws_once_over_the_whole_viewport() {
    let mut frame = Frame::new(vec![Light::directional(Vec3::new(0.3, -1.0, 0.2), Vec3::splat(0.5))]);
    let stats = frame.render(&PipelineSettings::default());

    assert_eq!(stats.lighting.drawn, 1);
    let draws = frame.device.draws_with_program("lighting");
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].scissor, Some(ScissorRect::full(WIDTH, HEIGHT)));
}

#[test]
fn lights_add_colour_only_on_tagged_geometry() {
    let mut frame = Frame::new(vec![
        Light::point(Vec3::new(0.5, 1.0, 1.0), Vec3::ONE, 3.0),
        Light::directional(Vec3::new(0.3, -1.0, 0.2), Vec3::splat(0.5)),
    ]);
    let stats = frame.render(&PipelineSettings::default());
    assert_eq!(stats.lighting.drawn, 2);

    let lights = frame.device.draws_with_program("lighting");
    assert_eq!(lights.len(), 2);
    for draw in &lights {
        assert_eq!(draw.state.blend, Some(BlendMode::ADDITIVE));
        assert_eq!(draw.state.color_mask, ColorMask::RGB);
        assert_eq!(draw.state.stencil, Some(StencilState::test_equal(GEOMETRY_STENCIL)));
    }

    let ambient = frame.device.draws_with_program("ambient");
    assert_eq!(ambient.len(), 1);
    assert_eq!(ambient[0].state.blend, None);
    assert_eq!(ambient[0].state.color_mask, ColorMask::ALL);
    assert_eq!(ambient[0].state.stencil, Some(StencilState::test_equal(GEOMETRY_STENCIL)));
}

#[test]
fn stencil_test_is_dropped_when_the_gbuffer_size_differs() {
    let mut frame = Frame::new(vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
    let mut settings = PipelineSettings::default();
    settings.gbuffer.custom_size = Some((WIDTH / 2, HEIGHT / 2));
    frame.render(&settings);

    let lights = frame.device.draws_with_program("lighting");
    assert_eq!(lights.len(), 1);
    assert_eq!(lights[0].state.stencil, None);
    assert_eq!(lights[0].state.blend, Some(BlendMode::ADDITIVE));

    let ambient = frame.device.draws_with_program("ambient");
    assert_eq!(ambient[0].state.stencil, None);
    assert!(matches!(
        &ambient[0].targets,
        TargetBinding::Offscreen { depth_stencil: None, .. }
    ));
}

#[test]
fn no_blur_composites_the_raw_occlusion() {
    let mut frame = Frame::new(Vec::new());
    let mut settings = PipelineSettings::default();
    settings.ssao.no_blur = true;
    let stats = frame.render(&settings);

    assert_eq!(stats.ambient_occlusion.blur_draws, 0);
    assert!(stats.ambient_occlusion.technique_draws > 0);
    assert!(frame.device.draws_with_program("ao_blur").is_empty());

    let raw = frame.pipeline.ambient_occlusion().result().unwrap();
    assert!(frame
        .device
        .commands()
        .iter()
        .any(|c| matches!(c, Command::BindTexture { texture, .. } if *texture == raw)));
    assert_eq!(frame.device.draws_with_program("ao_composite").len(), 1);
}

#[test]
fn technique_follows_settings() {
    let mut frame = Frame::new(Vec::new());
    let mut settings = PipelineSettings::default();
    settings.ssao.technique = AoTechniqueKind::HighDefinition;
    frame.render(&settings);

    assert!(!frame.device.draws_with_program("hdao").is_empty());
    assert!(frame.device.draws_with_program("hbao").is_empty());
}

#[test]
fn collapsed_focus_planes_give_finite_blur_parameters() {
    let settings = DofSettings {
        near_plane_depth: 4.0,
        focal_plane_depth: 4.0,
        far_plane_depth: 4.0,
        ..DofSettings::default()
    };
    let params = depth_blur_params(&settings);
    assert!(params.is_finite(), "{:?}", params);
}

fn grounded_character(world: &mut BodyStore, height: f32) -> CharacterController {
    create_physics_body(
        world,
        BodyShape::Box {
            half_extents: Vec3::new(5.0, 0.05, 5.0),
        },
        0.0,
        Vec3::new(0.0, -0.05, 0.0),
    );
    let body = create_physics_body(
        world,
        BodyShape::Capsule {
            radius: 0.4,
            half_height: 0.5,
        },
        70.0,
        Vec3::new(0.0, height, 0.0),
    );
    CharacterController::new(body, CharacterSettings::default())
}

#[test]
fn jump_is_gated_by_the_ready_timer() {
    let mut world = BodyStore::new();
    let mut character = grounded_character(&mut world, 0.9);
    character.set_jump_ready_timer(0.3);

    assert!(!character.jump(&mut world));
    assert_eq!(world.linear_velocity(character.body()).unwrap(), Vec3::ZERO);

    // The timer runs out through updates, then a grounded jump succeeds
    for _ in 0..4 {
        character.update(&mut world, 0.1).unwrap();
    }
    assert_eq!(character.jump_ready_timer(), 0.0);
    assert!(character.jump(&mut world));
    assert!(world.linear_velocity(character.body()).unwrap().y > 0.0);
}

#[test]
fn jump_needs_ground_other_than_the_character() {
    let mut world = BodyStore::new();
    let mut character = grounded_character(&mut world, 5.0);

    assert!(!character.jump(&mut world));
    assert_eq!(world.linear_velocity(character.body()).unwrap(), Vec3::ZERO);
}

#[test]
fn character_falls_and_lands_on_the_ground_plane() {
    let mut world = BodyStore::new().with_ground(0.0);
    let mut character = grounded_character(&mut world, 2.0);

    for _ in 0..120 {
        character.update(&mut world, 1.0 / 60.0).unwrap();
        world.step(1.0 / 60.0);
    }
    let transform = character.transform(&world).unwrap();
    let bottom = world.bounding_box(character.body()).unwrap().min.y;
    assert!(bottom.abs() < 1.0e-3, "bottom at {}", bottom);
    assert_eq!(transform.w_axis.y, world.position(character.body()).unwrap().y);
    assert!(character.jump(&mut world));
}
