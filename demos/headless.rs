//! Headless deferred rendering demo.
//!
//! Builds a small ECS scene, renders it on one thread and consumes the
//! finished frames on another, the way a windowing layer would.
//!
//! ```bash
//! cargo run --example headless -- --frames 120 --backend dummy
//! RUST_LOG=debug cargo run --example headless -- --width 640 --height 360
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::{Quat, Vec3};

use deferred_renderer::resources::{GpuMesh, Material, Mesh};
use deferred_renderer::scene::{
    ActiveCamera, AmbientLight, Camera, DirectionalLight, MeshRenderer, PointLight, SpotLight,
    Transform,
};
use deferred_renderer::{
    create_backend, extract_scene, BackendType, DeferredRenderer, RenderResult, RendererConfig,
    TonemapOperator, World,
};

/// Backend selection for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Headless wgpu device.
    #[default]
    Wgpu,
    /// Recording backend, no GPU required.
    Dummy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliTonemap {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    None,
}

#[derive(Parser, Debug)]
#[command(name = "headless", about = "Render a lit scene without a window")]
struct Args {
    #[arg(long, default_value = "wgpu", value_enum)]
    backend: CliBackend,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of frames to render before exiting.
    #[arg(long, default_value = "60")]
    frames: u64,

    /// Shadow cascades for the sun (1-4).
    #[arg(long, default_value = "4")]
    cascades: usize,

    #[arg(long, default_value = "aces", value_enum)]
    tonemap: CliTonemap,

    #[arg(long, default_value = "1.0")]
    exposure: f32,

    /// Halve the render size halfway through to exercise resizing.
    #[arg(long)]
    resize: bool,
}

fn build_world(renderer: &DeferredRenderer) -> RenderResult<World> {
    let backend = renderer.backend();
    let mut world = World::new();

    world.spawn((
        Camera::new(Vec3::new(0.0, 4.0, 12.0), Vec3::ZERO),
        ActiveCamera,
    ));

    let floor = Arc::new(GpuMesh::upload(backend, &Mesh::plane(30.0, 30.0, 4))?);
    world.spawn((
        MeshRenderer::new(floor, Arc::new(Material::rubber(Vec3::splat(0.4)))),
        Transform::default(),
    ));

    let cube = Arc::new(GpuMesh::upload(backend, &Mesh::cube())?);
    let materials = [
        Arc::new(Material::gold()),
        Arc::new(Material::plastic(Vec3::new(0.8, 0.1, 0.1))),
        Arc::new(Material::plastic(Vec3::new(0.1, 0.3, 0.8))),
    ];
    for (i, material) in materials.iter().enumerate() {
        let x = (i as f32 - 1.0) * 3.0;
        world.spawn((
            MeshRenderer::new(Arc::clone(&cube), Arc::clone(material)),
            Transform {
                position: Vec3::new(x, 1.0, 0.0),
                rotation: Quat::from_rotation_y(i as f32 * 0.4),
                scale: Vec3::ONE,
            },
        ));
    }

    world.spawn(DirectionalLight {
        shadow_resolution: Some(1024),
        ..Default::default()
    });
    world.spawn((
        PointLight {
            shadow_resolution: Some(256),
            ..Default::default()
        },
        Transform::from_position(Vec3::new(2.0, 3.0, 2.0)),
    ));
    world.spawn((
        SpotLight {
            shadow_resolution: Some(512),
            ..Default::default()
        },
        Transform::from_position(Vec3::new(-4.0, 5.0, 3.0)),
    ));
    world.spawn(AmbientLight::default());
    Ok(world)
}

fn run(args: Args) -> RenderResult<()> {
    let backend = create_backend(match args.backend {
        CliBackend::Wgpu => BackendType::Wgpu,
        CliBackend::Dummy => BackendType::Dummy,
    })?;
    let config = RendererConfig::default()
        .with_size(args.width, args.height)
        .with_shadow_cascades(args.cascades, 0.75)
        .with_exposure(args.exposure)
        .with_tonemap(match args.tonemap {
            CliTonemap::Reinhard => TonemapOperator::Reinhard,
            CliTonemap::Aces => TonemapOperator::Aces,
            CliTonemap::Uncharted2 => TonemapOperator::Uncharted2,
            CliTonemap::None => TonemapOperator::None,
        });
    let mut renderer = DeferredRenderer::new(backend, config)?;
    let mut world = build_world(&renderer)?;

    let presenter = renderer.presenter();
    let done = Arc::new(AtomicBool::new(false));
    let presentation = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut shown = 0u64;
            let mut last = 0u64;
            while !done.load(Ordering::Acquire) {
                let frame = presenter.next_front_buffer();
                if frame.fresh {
                    if frame.frame_number > last + 1 {
                        log::debug!(
                            "Presenter skipped {} frames",
                            frame.frame_number - last - 1
                        );
                    }
                    last = frame.frame_number;
                    shown += 1;
                }
                thread::sleep(Duration::from_millis(4));
            }
            (shown, last)
        })
    };

    let start = Instant::now();
    let mut result = Ok(());
    for frame in 0..args.frames {
        if args.resize && frame == args.frames / 2 {
            renderer.resize(args.width / 2, args.height / 2);
        }
        let scene = extract_scene(&mut world);
        match renderer.render_frame(Some(&scene)) {
            Ok(_) => {}
            Err(err) if err.is_fence_timeout() => {
                log::warn!("Frame {} timed out, retrying", frame);
            }
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }
    let elapsed = start.elapsed();
    done.store(true, Ordering::Release);

    match presentation.join() {
        Ok((shown, last)) => log::info!(
            "Rendered {} frames in {:.2?} ({:.1} fps), presenter showed {} up to frame {}",
            renderer.frame_count(),
            elapsed,
            renderer.frame_count() as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            shown,
            last
        ),
        Err(_) => log::error!("Presentation thread panicked"),
    }
    result
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Starting headless deferred renderer with {:?}", args);
    if let Err(err) = run(args) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
