//! Whole frames through the deferred pipeline on a recording device.

use deferred_passes::renderer::device::{ClearFlags, TargetBinding, TargetDescriptor, TextureFormat};
use deferred_passes::renderer::material::{params, Material, MaterialId, MaterialLibrary};
use deferred_passes::renderer::{
    cube_mesh, upload_mesh, Command, DeferredPipeline, FrameInput, FrameStats, GraphicsDevice, HeadlessDevice, Light,
};
use deferred_passes::scene::{Camera, LightNode, MeshId, MeshNode, VisibilityList};
use deferred_passes::settings::PipelineSettings;
use glam::{Mat4, Vec3, Vec4};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

struct Scene {
    visibility: VisibilityList,
    materials: MaterialLibrary,
    camera: Camera,
}

fn scene(device: &mut HeadlessDevice, lights: Vec<Light>) -> Scene {
    let camera = Camera::default();
    let aspect = WIDTH as f32 / HEIGHT as f32;
    let cube = upload_mesh(device, "Cube", MeshId(1), &cube_mesh()).unwrap();

    let mut materials = MaterialLibrary::new();
    let diffuse = device
        .create_texture("Diffuse", &TargetDescriptor::new(1, 1, TextureFormat::Rgba8Unorm), &[255; 4])
        .unwrap();
    materials.insert(Material::new(MaterialId(1), "plain").with_texture(params::DIFFUSE_MAP, diffuse));

    let mut visibility = VisibilityList::new();
    visibility.push_mesh(MeshNode::new(cube, MaterialId(1), Mat4::IDENTITY, &camera, aspect));
    for light in lights {
        visibility.push_light(LightNode::new(light, &camera));
    }
    Scene {
        visibility,
        materials,
        camera,
    }
}

fn render(device: &mut HeadlessDevice, pipeline: &mut DeferredPipeline, settings: &PipelineSettings, scene: &Scene) -> FrameStats {
    pipeline.render(
        device,
        settings,
        FrameInput {
            visibility: &scene.visibility,
            materials: &scene.materials,
            camera: &scene.camera,
            shadows: None,
            delta_time: 1.0 / 60.0,
        },
    )
}

/// Program label prefix of every draw, in issue order.
fn draw_sequence(device: &HeadlessDevice) -> Vec<String> {
    device
        .draws()
        .filter_map(|d| d.program_label.as_deref())
        .map(|label| label.split('[').next().unwrap_or(label).to_string())
        .collect()
}

fn first(sequence: &[String], name: &str) -> usize {
    sequence
        .iter()
        .position(|s| s == name)
        .unwrap_or_else(|| panic!("no {} draw in {:?}", name, sequence))
}

#[test]
fn passes_run_in_frame_order() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
    let mut settings = PipelineSettings::default();
    settings.post.edge_aa.enabled = true;
    let mut pipeline = DeferredPipeline::new();

    let stats = render(&mut device, &mut pipeline, &settings, &scene);
    assert!(stats.presented);

    let sequence = draw_sequence(&device);
    let order = ["gbuffer", "hbao", "ao_composite", "ambient", "lighting", "edge_aa", "hdr", "copy"];
    let positions: Vec<usize> = order.iter().map(|name| first(&sequence, name)).collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "unexpected order {:?}",
        sequence
    );

    let last = device.draws().last().unwrap();
    assert_eq!(last.targets, TargetBinding::Surface);
    assert_eq!(stats.post.applied.len(), 2);
}

#[test]
fn every_consuming_effect_swaps_once() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    let mut settings = PipelineSettings::default();
    settings.post.edge_aa.enabled = true;
    settings.post.hdr.enabled = false;
    let mut pipeline = DeferredPipeline::new();

    let stats = render(&mut device, &mut pipeline, &settings, &scene);
    // edge AA consumes once, End swaps once more
    assert_eq!(stats.swaps, 2);
}

#[test]
fn unchanged_settings_reuse_targets() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    let settings = PipelineSettings::default();
    let mut pipeline = DeferredPipeline::new();

    render(&mut device, &mut pipeline, &settings, &scene);
    device.reset_counters();
    render(&mut device, &mut pipeline, &settings, &scene);

    assert_eq!(device.textures_created(), 0);
    assert_eq!(device.textures_destroyed(), 0);
    assert_eq!(device.programs_created(), 0);
}

#[test]
fn format_change_recreates_only_the_colour_pair() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    let mut settings = PipelineSettings::default();
    settings.post.hdr.enabled = false;
    let mut pipeline = DeferredPipeline::new();
    render(&mut device, &mut pipeline, &settings, &scene);

    let depth = pipeline.surfaces().depth();
    settings.begin.format = TextureFormat::Rgba32Float;
    device.reset_counters();
    render(&mut device, &mut pipeline, &settings, &scene);

    let created: Vec<String> = device
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::CreateTexture { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["SurfaceA".to_string(), "SurfaceB".to_string()]);
    assert_eq!(device.textures_destroyed(), 2);
    assert_eq!(pipeline.surfaces().depth(), depth);
    assert_eq!(pipeline.surfaces().format(), Some(TextureFormat::Rgba32Float));
}

#[test]
fn begin_clears_colour_and_depth_without_stencil_bit() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    let mut settings = PipelineSettings::default();
    settings.begin.clear.stencil = false;
    settings.begin.clear_color = [0.0, 0.0, 0.0, 1.0];
    let mut pipeline = DeferredPipeline::new();

    render(&mut device, &mut pipeline, &settings, &scene);

    let (flags, color) = device.clears()[0];
    assert_eq!(flags, ClearFlags::COLOR | ClearFlags::DEPTH);
    assert!(!flags.contains(ClearFlags::STENCIL));
    assert_eq!(color, Vec4::new(0.0, 0.0, 0.0, 1.0));
}

#[test]
fn switching_the_shader_language_recompiles_everything() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
    let mut pipeline = DeferredPipeline::new();
    let settings = PipelineSettings::default().validate();
    render(&mut device, &mut pipeline, &settings, &scene);
    let compiled = device.live_programs();
    assert!(compiled > 0);

    let switched = PipelineSettings {
        shader_language: "wgsl-next".to_string(),
        ..PipelineSettings::default()
    }
    .validate();
    device.reset_counters();
    render(&mut device, &mut pipeline, &switched, &scene);

    assert_eq!(device.programs_destroyed(), compiled);
    assert_eq!(device.programs_created(), compiled);
    assert_eq!(device.live_programs(), compiled);
}

#[test]
fn failed_geometry_programs_still_present_a_frame() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    device.fail_programs_labelled("gbuffer");
    let mut pipeline = DeferredPipeline::new();

    let stats = render(&mut device, &mut pipeline, &PipelineSettings::default(), &scene);
    assert!(stats.presented);
    assert_eq!(stats.gbuffer.skipped_materials, 1);
    assert!(device.draws_with_program("gbuffer").is_empty());
    assert_eq!(device.draws_with_program("copy").len(), 1);
}

#[test]
fn release_frees_every_pipeline_resource() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
    let textures_before = device.live_textures();
    let buffers_before = device.live_buffers();
    let mut settings = PipelineSettings::default();
    settings.post.dof.enabled = true;
    settings.post.god_rays.enabled = true;
    settings.post.edge_aa.enabled = true;
    let mut pipeline = DeferredPipeline::new();

    render(&mut device, &mut pipeline, &settings, &scene);
    pipeline.release(&mut device);

    assert_eq!(device.live_programs(), 0);
    assert_eq!(device.live_textures(), textures_before);
    assert_eq!(device.live_buffers(), buffers_before);
}

fn readbacks(device: &HeadlessDevice) -> usize {
    device
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::ReadTarget(_)))
        .count()
}

#[test]
fn luminance_adaptation_stays_on_the_gpu() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, vec![Light::directional(Vec3::NEG_Y, Vec3::ONE)]);
    let settings = PipelineSettings::default();
    let mut pipeline = DeferredPipeline::new();

    let mut adapted = Vec::new();
    for _ in 0..2 {
        device.reset_counters();
        let stats = render(&mut device, &mut pipeline, &settings, &scene);
        assert_eq!(readbacks(&device), 0);
        assert_eq!(stats.post.adapted_luminance, None);

        let hdr = pipeline.post().hdr().unwrap();
        assert!(hdr.stats().adapted);
        let target = hdr.adapted_target().unwrap();
        // The tonemap samples the adapted value straight from the target
        assert!(device
            .commands()
            .iter()
            .any(|c| matches!(c, Command::BindTexture { texture, .. } if *texture == target)));
        adapted.push(target);
    }
    assert_ne!(adapted[0], adapted[1]);
}

#[test]
fn nan_detection_reads_back_the_adapted_luminance() {
    let mut device = HeadlessDevice::new(WIDTH, HEIGHT);
    let scene = scene(&mut device, Vec::new());
    let mut settings = PipelineSettings::default();
    settings.post.hdr.nan_detection = true;
    device.set_readback_fill([0.5, 0.25, 0.0, 1.0]);
    let mut pipeline = DeferredPipeline::new();

    let stats = render(&mut device, &mut pipeline, &settings, &scene);
    // One scan of the image, one of the adapted luminance
    assert_eq!(readbacks(&device), 2);
    assert_eq!(stats.post.nan_texels, 0);
    assert_eq!(stats.post.adapted_luminance, Some(0.5));
    let hdr = pipeline.post().hdr().unwrap().stats();
    assert_eq!(hdr.average_luminance, 0.25);
}
