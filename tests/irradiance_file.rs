//! Irradiance bake persisted to disk and read back.

mod common;

use std::path::PathBuf;

use approx::assert_relative_eq;
use rstest::rstest;

use common::{cubes_at, lit_backend};
use deferred_probe_renderer::bake::{load_probes, save_probes, GridLayout, IrradianceGrid, ProbeFileError};
use deferred_probe_renderer::{IrradianceGridDesc, RendererConfig, RendererError};
use glam::{UVec3, Vec3, Vec4};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}.bin", name, std::process::id()))
}

fn baked_grid() -> IrradianceGrid {
    let mut backend = lit_backend(16, 16);
    let mut scene = cubes_at(&[Vec3::ZERO]);
    let mut renderer = RendererConfig::default()
        .with_size(16, 16)
        .with_irradiance_resolution(8)
        .with_clear_color(Vec4::new(0.2, 0.4, 0.6, 1.0))
        .build(&mut backend);
    let desc = IrradianceGridDesc::new(Vec3::new(-4.0, 0.0, -4.0), Vec3::new(4.0, 6.0, 4.0), UVec3::splat(2));
    renderer
        .bake_irradiance(&mut backend, &mut scene, desc)
        .expect("bake")
        .clone()
}

#[test]
fn test_baked_grid_survives_a_file_round_trip() {
    let grid = baked_grid();
    assert_eq!(grid.probes().len(), 8);

    let path = temp_path("irradiance-round-trip");
    save_probes(&grid, &path).unwrap();
    let size = std::fs::metadata(&path).unwrap().len();
    let loaded = load_probes(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(size, 52 + 8 * 27 * 4);
    assert_eq!(loaded.layout, grid.layout);
    assert_eq!(loaded.end, grid.end);
    for (a, b) in grid.probes().iter().zip(loaded.probes()) {
        assert_eq!(a.index, b.index);
        assert_eq!(a.coord, b.coord);
        assert_eq!(a.position, b.position);
        let bits = |p: &deferred_probe_renderer::bake::Probe| p.sh.as_floats().map(f32::to_bits);
        assert_eq!(bits(a), bits(b));
    }
}

#[test]
fn test_uniform_surroundings_bake_to_their_color() {
    let grid = baked_grid();
    let corner = grid.probe(0).unwrap();
    assert_eq!(corner.position, Vec3::new(-4.0, 0.0, -4.0));
    assert_eq!(grid.probe(7).unwrap().position, Vec3::new(4.0, 6.0, 4.0));
    for normal in [Vec3::X, Vec3::NEG_Y, Vec3::new(0.0, 0.6, 0.8)] {
        let irradiance = corner.sh.irradiance(normal) / std::f32::consts::PI;
        assert_relative_eq!(irradiance.x, 0.2, epsilon = 0.02);
        assert_relative_eq!(irradiance.y, 0.4, epsilon = 0.02);
        assert_relative_eq!(irradiance.z, 0.6, epsilon = 0.02);
    }
}

#[test]
fn test_loading_a_missing_file_keeps_the_current_grid() {
    let mut backend = lit_backend(8, 8);
    let mut renderer = RendererConfig::default().with_size(8, 8).build(&mut backend);
    let grid = IrradianceGrid::from_desc(&IrradianceGridDesc::default()).unwrap();
    renderer.set_irradiance(&mut backend, grid).unwrap();

    let err = renderer
        .load_irradiance(&mut backend, temp_path("irradiance-does-not-exist"))
        .unwrap_err();
    assert!(matches!(err, RendererError::ProbeFile(ProbeFileError::Io(_))));
    assert_eq!(renderer.irradiance().map(|g| g.probes().len()), Some(8));
}

// ============================================================================
// Grid indexing
// ============================================================================

#[rstest]
#[case::cube(UVec3::splat(2))]
#[case::flat(UVec3::new(5, 1, 3))]
#[case::line(UVec3::new(1, 1, 7))]
#[case::uneven(UVec3::new(3, 4, 2))]
fn test_linear_index_is_a_bijection(#[case] dims: UVec3) {
    let layout = GridLayout {
        start: Vec3::ZERO,
        delta: Vec3::ONE,
        dims,
    };
    let count = layout.probe_count();
    assert_eq!(count, (dims.x * dims.y * dims.z) as usize);
    let mut seen = vec![false; count];
    for coord in layout.coords() {
        let index = layout.index(coord);
        assert_eq!(index, (coord.x + coord.y * dims.x + coord.z * dims.x * dims.y) as usize);
        assert!(!seen[index]);
        seen[index] = true;
        assert_eq!(layout.coord_of(index), coord);
    }
    assert!(seen.into_iter().all(|s| s));
}
