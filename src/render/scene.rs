//! Reference differentiable renderer.

use nalgebra::{Point2, Point3, Vector3};

use super::camera::Camera;
use super::light::{Ambient, Background, LightConfig};
use super::raster::{rasterize, rasterize_backward, Fragments, RasterInput};
use super::{DifferentiableRenderer, RenderGradients, Rendering};
use crate::error::{FitError, Result};
use crate::image::Image;
use crate::mesh::{vertex_normals, vertex_normals_backward, TriMesh, VertexNormals};

/// A single-mesh scene rendered by software rasterization.
///
/// Colors are shaded per vertex with [`LightConfig`] and interpolated across
/// triangles; depth renders interpolate the camera-frame depth. Silhouette
/// edges are antialiased over a band `sigma` pixels wide so that the image
/// varies smoothly with the occluding contour.
///
/// # Example
///
/// ```
/// use meshfit::mesh::icosphere;
/// use meshfit::render::{Camera, DifferentiableRenderer, Scene3D};
/// use nalgebra::{Matrix3, Point3};
///
/// let mesh = icosphere(1).unwrap();
/// let flip = Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0);
/// let camera = Camera::look_from(&Point3::new(0.0, 0.0, 4.0), &flip, 40.0, (32, 32), None).unwrap();
///
/// let mut scene = Scene3D::new();
/// scene.set_max_depth(10.0);
/// let depth = scene.render_depth(&camera, &mesh, (32, 32), 1.0).unwrap();
/// assert!(depth.image.get(16, 16, 0) < 4.0);
/// ```
#[derive(Debug, Clone)]
pub struct Scene3D {
    background: Background,
    light: LightConfig,
    max_depth: Option<f64>,
    sigma: f64,
    parallel: bool,
}

impl Default for Scene3D {
    fn default() -> Self {
        Self {
            background: Background::default(),
            light: LightConfig::default(),
            max_depth: None,
            sigma: 1.0,
            parallel: true,
        }
    }
}

impl Scene3D {
    /// Scene with a black background, unit ambient light and 1 pixel
    /// silhouette antialiasing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the silhouette band width in pixels (0 disables antialiasing).
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    /// Enable or disable rayon for the projection pass.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    pub fn with_light(mut self, light: LightConfig) -> Self {
        self.light = light;
        self
    }

    /// Silhouette band width in pixels.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    fn check_sigma(&self) -> Result<()> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(FitError::invalid_param(
                "sigma",
                self.sigma,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }

    fn background_image(&self, resolution: (usize, usize)) -> Result<Image> {
        let (width, height) = resolution;
        match &self.background {
            Background::Constant(value) if value.len() == 3 => {
                Image::tiled(width, height, value)
            }
            Background::Constant(value) => Err(FitError::configuration(format!(
                "color background needs 3 channels, got {}",
                value.len()
            ))),
            Background::Image(image) => {
                if image.resolution() != resolution || image.channels() != 3 {
                    return Err(FitError::configuration(format!(
                        "background image is {}x{}x{}, expected {}x{}x3",
                        image.width(),
                        image.height(),
                        image.channels(),
                        width,
                        height
                    )));
                }
                Ok(image.clone())
            }
        }
    }

    fn project(&self, camera: &Camera, vertices: &[Point3<f64>]) -> (Vec<Point2<f64>>, Vec<f64>) {
        camera
            .project_points(vertices, self.parallel)
            .into_iter()
            .map(|p| (p.pixel, p.depth))
            .unzip()
    }
}

#[derive(Debug, Clone)]
enum Shading {
    Color {
        normals: VertexNormals,
        colors: Vec<Vector3<f64>>,
        /// `max(0, -n.l)` per vertex.
        diffuse: Vec<f64>,
        light: LightConfig,
    },
    Depth {
        depth_scale: f64,
    },
}

/// Everything [`Scene3D`] needs to run the adjoint of one render.
#[derive(Debug, Clone)]
pub struct SceneTape {
    shading: Shading,
    camera: Camera,
    vertices: Vec<Point3<f64>>,
    faces: Vec<[usize; 3]>,
    positions: Vec<Point2<f64>>,
    depths: Vec<f64>,
    attributes: Vec<f64>,
    channels: usize,
    sigma: f64,
    background: Image,
    fragments: Fragments,
}

impl SceneTape {
    /// What the rasterizer drew, per pixel.
    pub fn fragments(&self) -> &Fragments {
        &self.fragments
    }

    fn raster_input(&self) -> RasterInput<'_> {
        RasterInput {
            positions: &self.positions,
            depths: &self.depths,
            attributes: &self.attributes,
            channels: self.channels,
            faces: &self.faces,
            sigma: self.sigma,
        }
    }
}

impl DifferentiableRenderer for Scene3D {
    type Tape = SceneTape;

    fn set_background(&mut self, background: Background) {
        self.background = background;
    }

    fn set_light(&mut self, light: LightConfig) {
        self.light = light;
    }

    fn light(&self) -> &LightConfig {
        &self.light
    }

    fn max_depth(&self) -> Option<f64> {
        self.max_depth
    }

    fn set_max_depth(&mut self, max_depth: f64) {
        self.max_depth = Some(max_depth);
    }

    fn render(&self, camera: &Camera, mesh: &TriMesh) -> Result<Rendering<SceneTape>> {
        self.check_sigma()?;
        let colors = mesh
            .colors()
            .ok_or_else(|| FitError::precondition("color rendering needs per-vertex colors"))?;
        let background = self.background_image(camera.resolution())?;

        let vertices = mesh.vertices().to_vec();
        let normals = vertex_normals(&vertices, mesh.faces());
        let diffuse: Vec<f64> = normals
            .normals
            .iter()
            .map(|n| (-n.dot(&self.light.directional)).max(0.0))
            .collect();
        let ambient = self.light.ambient.per_channel();
        let attributes: Vec<f64> = colors
            .iter()
            .zip(&diffuse)
            .flat_map(|(color, d)| {
                let shaded = color.component_mul(&(ambient + Vector3::repeat(*d)));
                [shaded.x, shaded.y, shaded.z]
            })
            .collect();

        let (positions, depths) = self.project(camera, &vertices);
        let input = RasterInput {
            positions: &positions,
            depths: &depths,
            attributes: &attributes,
            channels: 3,
            faces: mesh.faces(),
            sigma: self.sigma,
        };
        let (image, fragments) = rasterize(&input, mesh.topology().edges(), &background);

        Ok(Rendering {
            image,
            tape: SceneTape {
                shading: Shading::Color {
                    normals,
                    colors: colors.to_vec(),
                    diffuse,
                    light: self.light,
                },
                camera: camera.clone(),
                vertices,
                faces: mesh.faces().to_vec(),
                positions,
                depths,
                attributes,
                channels: 3,
                sigma: self.sigma,
                background,
                fragments,
            },
        })
    }

    fn render_depth(
        &self,
        camera: &Camera,
        mesh: &TriMesh,
        resolution: (usize, usize),
        depth_scale: f64,
    ) -> Result<Rendering<SceneTape>> {
        self.check_sigma()?;
        let max_depth = self
            .max_depth
            .ok_or_else(|| FitError::precondition("max depth must be set before rendering depth"))?;
        if resolution != camera.resolution() {
            return Err(FitError::configuration(format!(
                "requested resolution {:?} does not match camera resolution {:?}",
                resolution,
                camera.resolution()
            )));
        }
        let (width, height) = resolution;
        let background = Image::filled(width, height, 1, max_depth);

        let vertices = mesh.vertices().to_vec();
        let (positions, depths) = self.project(camera, &vertices);
        let attributes: Vec<f64> = depths.iter().map(|d| d * depth_scale).collect();
        let input = RasterInput {
            positions: &positions,
            depths: &depths,
            attributes: &attributes,
            channels: 1,
            faces: mesh.faces(),
            sigma: self.sigma,
        };
        let (image, fragments) = rasterize(&input, mesh.topology().edges(), &background);

        Ok(Rendering {
            image,
            tape: SceneTape {
                shading: Shading::Depth { depth_scale },
                camera: camera.clone(),
                vertices,
                faces: mesh.faces().to_vec(),
                positions,
                depths,
                attributes,
                channels: 1,
                sigma: self.sigma,
                background,
                fragments,
            },
        })
    }

    fn backward(&self, rendering: &Rendering<SceneTape>, image_grad: &Image) -> Result<RenderGradients> {
        let tape = &rendering.tape;
        if image_grad.resolution() != rendering.image.resolution()
            || image_grad.channels() != rendering.image.channels()
        {
            return Err(FitError::invalid_param(
                "image_grad",
                format!(
                    "{}x{}x{}",
                    image_grad.width(),
                    image_grad.height(),
                    image_grad.channels()
                ),
                "must match the rendered image shape",
            ));
        }

        let raster = rasterize_backward(&tape.raster_input(), &tape.fragments, &tape.background, image_grad);

        match &tape.shading {
            Shading::Depth { depth_scale } => {
                let vertices = tape
                    .vertices
                    .iter()
                    .zip(&raster.positions)
                    .zip(&raster.attributes)
                    .map(|((p, g_pixel), g_attr)| {
                        tape.camera.project_backward(p, g_pixel, g_attr * depth_scale)
                    })
                    .collect();
                Ok(RenderGradients {
                    vertices,
                    colors: None,
                    directional: Vector3::zeros(),
                    ambient: Ambient::Scalar(0.0),
                })
            }
            Shading::Color {
                normals,
                colors,
                diffuse,
                light,
            } => {
                let ambient = light.ambient.per_channel();
                let mut grad_colors = Vec::with_capacity(colors.len());
                let mut grad_normals = Vec::with_capacity(colors.len());
                let mut grad_directional = Vector3::zeros();
                let mut grad_ambient = Vector3::zeros();

                for (i, color) in colors.iter().enumerate() {
                    let g_attr = Vector3::from_column_slice(&raster.attributes[3 * i..3 * i + 3]);
                    let luminosity = ambient + Vector3::repeat(diffuse[i]);
                    grad_colors.push(g_attr.component_mul(&luminosity));

                    let g_luminosity = g_attr.component_mul(color);
                    grad_ambient += g_luminosity;
                    let g_diffuse = g_luminosity.sum();
                    let n = normals.normals[i];
                    if -n.dot(&light.directional) > 0.0 {
                        grad_normals.push(-light.directional * g_diffuse);
                        grad_directional -= n * g_diffuse;
                    } else {
                        grad_normals.push(Vector3::zeros());
                    }
                }

                let from_normals =
                    vertex_normals_backward(&tape.vertices, &tape.faces, normals, &grad_normals);
                let vertices = tape
                    .vertices
                    .iter()
                    .zip(&raster.positions)
                    .zip(&from_normals)
                    .map(|((p, g_pixel), g_normal)| {
                        tape.camera.project_backward(p, g_pixel, 0.0) + g_normal
                    })
                    .collect();

                Ok(RenderGradients {
                    vertices,
                    colors: Some(grad_colors),
                    directional: grad_directional,
                    ambient: light.ambient.gradient_from_channels(&grad_ambient),
                })
            }
        }
    }
}
