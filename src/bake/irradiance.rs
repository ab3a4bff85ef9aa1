//! Irradiance probe grid and its bake

use glam::{UVec3, Vec3, Vec4};

use super::cubemap::face_render_view;
use super::spherical_harmonics::{SphericalHarmonics, SH_COEFFICIENTS};
use super::{BakeError, BakeResult};
use crate::backend::{
    CubeFace, FloatImage, Framebuffer, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::pipeline::forward_pass;
use crate::scene::Scene;

/// Grid placement as configured by the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrradianceGridDesc {
    pub start: Vec3,
    pub end: Vec3,
    pub dims: UVec3,
}

impl Default for IrradianceGridDesc {
    fn default() -> Self {
        Self {
            start: Vec3::new(-55.0, 10.0, -170.0),
            end: Vec3::new(180.0, 150.0, 80.0),
            dims: UVec3::splat(2),
        }
    }
}

impl IrradianceGridDesc {
    pub fn new(start: Vec3, end: Vec3, dims: UVec3) -> Self {
        Self { start, end, dims }
    }

    /// Step between neighbouring probes; a single-probe axis has step 0
    pub fn delta(&self) -> Vec3 {
        let axis = |extent: f32, n: u32| if n > 1 { extent / (n - 1) as f32 } else { 0.0 };
        let extent = self.end - self.start;
        Vec3::new(
            axis(extent.x, self.dims.x),
            axis(extent.y, self.dims.y),
            axis(extent.z, self.dims.z),
        )
    }

    pub fn layout(&self) -> BakeResult<GridLayout> {
        if self.dims.min_element() == 0 {
            return Err(BakeError::InvalidDims(self.dims));
        }
        Ok(GridLayout {
            start: self.start,
            delta: self.delta(),
            dims: self.dims,
        })
    }
}

/// Probe indexing: `index = x + y·dx + z·dx·dy`, `position = start + delta ⊙ coord`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub start: Vec3,
    pub delta: Vec3,
    pub dims: UVec3,
}

impl GridLayout {
    pub fn probe_count(&self) -> usize {
        (self.dims.x * self.dims.y * self.dims.z) as usize
    }

    pub fn index(&self, coord: UVec3) -> usize {
        (coord.x + coord.y * self.dims.x + coord.z * self.dims.x * self.dims.y) as usize
    }

    pub fn coord_of(&self, index: usize) -> UVec3 {
        let index = index as u32;
        let slice = self.dims.x * self.dims.y;
        UVec3::new(index % self.dims.x, (index % slice) / self.dims.x, index / slice)
    }

    pub fn position(&self, coord: UVec3) -> Vec3 {
        self.start + self.delta * coord.as_vec3()
    }

    /// Cells in bake order: z outermost, x innermost
    pub fn coords(&self) -> impl Iterator<Item = UVec3> + '_ {
        (0..self.dims.z).flat_map(move |z| {
            (0..self.dims.y).flat_map(move |y| (0..self.dims.x).map(move |x| UVec3::new(x, y, z)))
        })
    }

    /// Trilinear blend of the coefficients around `position`, clamped to the grid
    pub fn sample(&self, position: Vec3, fetch: impl Fn(usize) -> SphericalHarmonics) -> SphericalHarmonics {
        let mut lo = [0u32; 3];
        let mut hi = [0u32; 3];
        let mut t = [0.0f32; 3];
        for axis in 0..3 {
            let n = self.dims[axis];
            let step = self.delta[axis];
            let local = if step.abs() > f32::EPSILON {
                ((position[axis] - self.start[axis]) / step).clamp(0.0, (n - 1) as f32)
            } else {
                0.0
            };
            lo[axis] = local.floor() as u32;
            hi[axis] = (lo[axis] + 1).min(n - 1);
            t[axis] = local - lo[axis] as f32;
        }

        let mut result = SphericalHarmonics::default();
        for corner in 0..8u32 {
            let pick = |axis: usize| corner >> axis & 1 == 1;
            let mut weight = 1.0;
            let mut coord = UVec3::ZERO;
            for axis in 0..3 {
                if pick(axis) {
                    weight *= t[axis];
                    coord[axis] = hi[axis];
                } else {
                    weight *= 1.0 - t[axis];
                    coord[axis] = lo[axis];
                }
            }
            if weight > 0.0 {
                result.add_scaled(&fetch(self.index(coord)), weight);
            }
        }
        result
    }
}

/// One irradiance probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub coord: UVec3,
    pub index: usize,
    pub position: Vec3,
    pub sh: SphericalHarmonics,
}

/// Baked (or loaded) probe grid, read-only at render time
#[derive(Debug, Clone, PartialEq)]
pub struct IrradianceGrid {
    pub layout: GridLayout,
    pub end: Vec3,
    probes: Vec<Probe>,
}

impl IrradianceGrid {
    /// Grid with every probe at zero. Probes are stored by linear index.
    pub fn new(layout: GridLayout, end: Vec3) -> Self {
        let probes = layout
            .coords()
            .map(|coord| Probe {
                coord,
                index: layout.index(coord),
                position: layout.position(coord),
                sh: SphericalHarmonics::default(),
            })
            .collect();
        Self { layout, end, probes }
    }

    pub fn from_desc(desc: &IrradianceGridDesc) -> BakeResult<Self> {
        Ok(Self::new(desc.layout()?, desc.end))
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn probe(&self, index: usize) -> Option<&Probe> {
        self.probes.get(index)
    }

    pub fn set_coefficients(&mut self, index: usize, sh: SphericalHarmonics) -> bool {
        match self.probes.get_mut(index) {
            Some(probe) => {
                probe.sh = sh;
                true
            }
            None => false,
        }
    }

    /// Interpolated irradiance at a world position for a surface normal
    pub fn sample(&self, position: Vec3, normal: Vec3) -> Vec3 {
        self.layout
            .sample(position, |index| self.probes.get(index).map(|p| p.sh).unwrap_or_default())
            .irradiance(normal)
    }

    /// Texels of the `9 × num_probes` coefficient texture, one probe per row
    pub fn to_texels(&self) -> Vec<Vec4> {
        self.probes
            .iter()
            .flat_map(|p| p.sh.coeffs.iter().map(|c| c.extend(1.0)))
            .collect()
    }

    pub fn upload<B: GraphicsBackend>(&self, backend: &mut B) -> BakeResult<TextureHandle> {
        let desc = TextureDescriptor::new_2d(
            "irradiance probes",
            SH_COEFFICIENTS as u32,
            self.probes.len() as u32,
            TextureFormat::Rgba32Float,
        );
        let texture = backend.create_texture(&desc)?;
        backend.write_texture(texture, None, &self.to_texels())?;
        Ok(texture)
    }
}

/// Renders cube views at every probe and projects them to SH
#[derive(Debug, Clone, PartialEq)]
pub struct IrradianceBaker {
    pub desc: IrradianceGridDesc,
    pub near: f32,
    pub far: f32,
    pub clear_color: Vec4,
}

impl IrradianceBaker {
    pub fn new(desc: IrradianceGridDesc) -> Self {
        Self {
            desc,
            near: 0.1,
            far: 1000.0,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    /// Bake every probe into a new grid. Nothing is returned unless every
    /// probe succeeded.
    pub fn bake<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        target: &Framebuffer,
    ) -> BakeResult<IrradianceGrid> {
        let mut grid = IrradianceGrid::from_desc(&self.desc)?;
        let color = target.color(0).ok_or(BakeError::MissingTarget("irradiance color"))?;
        log::info!(
            "Baking {} irradiance probes at {}x{}",
            grid.probes.len(),
            target.width,
            target.height
        );

        for probe in grid.probes.iter_mut() {
            let faces = self.render_faces(backend, scene, target, color, probe.position)?;
            probe.sh = SphericalHarmonics::project_cubemap(&faces);
        }
        backend.bind_framebuffer(None);

        log::info!("Irradiance bake finished");
        Ok(grid)
    }

    fn render_faces<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        target: &Framebuffer,
        color: TextureHandle,
        position: Vec3,
    ) -> BakeResult<[FloatImage; 6]> {
        let mut faces: Vec<FloatImage> = Vec::with_capacity(6);
        for face in CubeFace::ALL {
            let view = face_render_view(face, position, self.near, self.far);
            backend.bind_framebuffer(Some(target.handle));
            backend.set_viewport(target.viewport());
            forward_pass::render_view(backend, scene, &view, self.clear_color);
            faces.push(backend.read_texture(color, None, 0)?);
        }
        faces.try_into().map_err(|_| BakeError::MissingTarget("cube face"))
    }
}
