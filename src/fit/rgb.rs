//! Fitting a colored mesh, its pose, color and lighting to an RGB image.

use nalgebra::{Point3, Vector3, Vector4};

use super::config::FitterConfig;
use super::pose::{broadcast_color, quaternion_from_euler_zyx, RigidTransform};
use super::state::{Appearance, FitState, Session, Speeds};
use super::step::{
    apply_update, ensure_finite_energy, AppearanceGradients, Fitter, GroupGradients, StepResult,
};
use super::target::{DataTerm, Target};
use crate::algo::LaplacianRigidEnergy;
use crate::error::{FitError, Result};
use crate::image::Image;
use crate::mesh::{centroid, object_radius, TriMesh};
use crate::render::{
    Background, Camera, DifferentiableRenderer, Distortion, LightConfig, Rendering, Scene3D,
};

/// Camera offset from the posed mesh center, in units of object radius.
const CAMERA_OFFSET: [f64; 3] = [0.0, 0.0, 9.0];

/// Fits vertex positions, pose, a global color and the lights of a mesh to
/// an RGB image.
///
/// Unlike [`MeshDepthFitter`](super::MeshDepthFitter), the stored vertices
/// are not re-centered at the start of each step; only the rendered copy is.
#[derive(Debug)]
pub struct MeshRgbFitter<R: DifferentiableRenderer = Scene3D> {
    mesh: TriMesh,
    renderer: R,
    rigidity: LaplacianRigidEnergy,
    config: FitterConfig,
    session: Session,
    camera_center: Point3<f64>,
    target: Option<Target>,
}

impl MeshRgbFitter<Scene3D> {
    /// Build a fitter rendering with [`Scene3D`].
    pub fn new(
        vertices: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        euler_init: Vector3<f64>,
        translation_init: Vector3<f64>,
        default_color: Vector3<f64>,
        default_light: LightConfig,
        config: FitterConfig,
    ) -> Result<Self> {
        let renderer = Scene3D::new().with_parallel(config.parallel);
        Self::with_renderer(
            vertices,
            faces,
            euler_init,
            translation_init,
            default_color,
            default_light,
            config,
            renderer,
        )
    }
}

impl<R: DifferentiableRenderer> MeshRgbFitter<R> {
    /// Build a fitter around any differentiable renderer.
    #[allow(clippy::too_many_arguments)]
    pub fn with_renderer(
        vertices: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        euler_init: Vector3<f64>,
        translation_init: Vector3<f64>,
        default_color: Vector3<f64>,
        default_light: LightConfig,
        config: FitterConfig,
        renderer: R,
    ) -> Result<Self> {
        config.validate()?;
        let colors = broadcast_color(&default_color, vertices.len());
        let mesh = TriMesh::with_colors(faces, vertices.clone(), colors)?;
        let rigidity = LaplacianRigidEnergy::new(&mesh, &vertices, config.cregu)?;
        let camera_center = centroid(&vertices)
            + translation_init
            + Vector3::from(CAMERA_OFFSET) * object_radius(&vertices);
        let session = Session::new(FitState {
            vertices,
            quaternion: quaternion_from_euler_zyx(&euler_init),
            translation: translation_init,
            appearance: Some(Appearance {
                color: default_color,
                light: default_light,
            }),
        });

        Ok(Self {
            mesh,
            renderer,
            rigidity,
            config,
            session,
            camera_center,
            target: None,
        })
    }

    /// Constant color shown where the mesh is absent.
    pub fn set_background_color(&mut self, color: Vector3<f64>) {
        self.renderer
            .set_background(Background::Constant(vec![color.x, color.y, color.z]));
    }

    /// Bind a 3-channel target image and build the camera. Resets the
    /// iteration counter.
    ///
    /// # Errors
    ///
    /// [`FitError::Precondition`] if `image` does not have three channels.
    pub fn set_image(
        &mut self,
        image: &Image,
        focal: Option<f64>,
        distortion: Option<Distortion>,
    ) -> Result<()> {
        self.target = Some(Target::new(image, 3, &self.camera_center, focal, distortion)?);
        self.session.iteration = 0;
        Ok(())
    }

    /// Replace the pose restored by the next [`Fitter::reset`].
    pub fn set_mesh_transform_init(&mut self, euler: Vector3<f64>, translation: Vector3<f64>) {
        self.session
            .set_pose_init(quaternion_from_euler_zyx(&euler), translation);
    }

    /// Render the current state without updating it.
    pub fn preview(&mut self) -> Result<Image> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FitError::precondition("set_image must be called before rendering"))?;
        let (_, rendering) = render_state(
            &mut self.mesh,
            &mut self.renderer,
            &self.session.current,
            &target.camera,
            self.config.parallel,
        )?;
        Ok(rendering.image)
    }

    pub fn state(&self) -> &FitState {
        &self.session.current
    }

    pub fn speeds(&self) -> &Speeds {
        &self.session.speeds
    }

    /// Normalized rotation `[x, y, z, w]`.
    pub fn quaternion(&self) -> &Vector4<f64> {
        &self.session.current.quaternion
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.session.current.translation
    }

    /// Current global color and lights.
    pub fn appearance(&self) -> Option<&Appearance> {
        self.session.current.appearance.as_ref()
    }

    /// The camera built by [`MeshRgbFitter::set_image`].
    pub fn camera(&self) -> Option<&Camera> {
        self.target.as_ref().map(|t| &t.camera)
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

/// Pose the mesh, paint it, light the scene and render.
fn render_state<R: DifferentiableRenderer>(
    mesh: &mut TriMesh,
    renderer: &mut R,
    state: &FitState,
    camera: &Camera,
    parallel: bool,
) -> Result<(RigidTransform, Rendering<R::Tape>)> {
    let appearance = state
        .appearance
        .ok_or_else(|| FitError::precondition("color fitting needs an appearance state"))?;
    let (transform, transformed) =
        RigidTransform::forward(&state.vertices, &state.quaternion, &state.translation, parallel)?;
    mesh.set_vertices(transformed)?;
    mesh.set_vertices_colors(broadcast_color(&appearance.color, mesh.nb_vertices()))?;
    renderer.set_light(appearance.light);
    let rendering = renderer.render(camera, mesh)?;
    Ok((transform, rendering))
}

impl<R: DifferentiableRenderer> Fitter for MeshRgbFitter<R> {
    fn step(&mut self) -> Result<StepResult> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FitError::precondition("set_image must be called before step"))?;
        let state = &self.session.current;
        let (transform, rendering) = render_state(
            &mut self.mesh,
            &mut self.renderer,
            state,
            &target.camera,
            self.config.parallel,
        )?;

        let data = DataTerm::eval(&rendering.image, &target.image, None)?;
        let rigidity = self.rigidity.eval(&state.vertices)?;
        let energy = data.energy + rigidity.energy;
        ensure_finite_energy(energy)?;

        let render_grads = self.renderer.backward(&rendering, &data.gradient)?;
        let pose = transform.backward(&render_grads.vertices);
        let color = render_grads
            .colors
            .as_ref()
            .map(|colors| colors.iter().sum::<Vector3<f64>>())
            .unwrap_or_else(Vector3::zeros);
        let grads = GroupGradients {
            vertices: pose
                .vertices
                .iter()
                .zip(&rigidity.gradient)
                .map(|(d, r)| d + r)
                .collect(),
            quaternion: pose.quaternion,
            translation: pose.translation,
            appearance: Some(AppearanceGradients {
                color,
                directional: render_grads.directional,
                ambient: render_grads.ambient,
            }),
        };
        grads.ensure_finite()?;

        log::debug!(
            "iteration {}: Energy={} : EData={} E_rigid={}",
            self.session.iteration,
            energy,
            data.energy,
            rigidity.energy
        );

        let rigidity_energy = rigidity.energy;
        let vertices = state.vertices.clone();
        let (state, speeds) = apply_update(&self.session, &self.config, &grads, vertices)?;
        self.session.current = state;
        self.session.speeds = speeds;
        self.session.iteration += 1;

        Ok(StepResult {
            energy,
            data_energy: data.energy,
            rigidity_energy,
            rendered: rendering.image,
            diff: data.diff,
        })
    }

    fn reset(&mut self) {
        self.session.reset();
    }

    fn iteration(&self) -> usize {
        self.session.iteration
    }
}
