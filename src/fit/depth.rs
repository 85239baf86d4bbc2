//! Fitting a mesh and its rigid pose to a depth map.

use nalgebra::{Point3, Vector3, Vector4};

use super::config::FitterConfig;
use super::pose::{centered, quaternion_from_euler_zyx, RigidTransform};
use super::state::{FitState, Session, Speeds};
use super::step::{apply_update, ensure_finite_energy, Fitter, GroupGradients, StepResult};
use super::target::{clamp_depth, DataTerm, Target};
use crate::algo::LaplacianRigidEnergy;
use crate::error::{FitError, Result};
use crate::image::Image;
use crate::mesh::{centroid, object_radius, TriMesh};
use crate::render::{Camera, DifferentiableRenderer, Distortion, Scene3D};

/// Camera offset from the mesh center, in units of object radius.
const CAMERA_OFFSET: [f64; 3] = [-0.5, 0.0, 5.0];

/// Fits vertex positions, rotation and translation of a mesh to a depth map.
///
/// # Example
///
/// ```
/// use meshfit::fit::{Fitter, FitterConfig, MeshDepthFitter};
/// use meshfit::image::Image;
/// use meshfit::mesh::icosphere;
/// use nalgebra::Vector3;
///
/// let sphere = icosphere(1).unwrap();
/// let mut fitter = MeshDepthFitter::new(
///     sphere.vertices().to_vec(),
///     sphere.faces().to_vec(),
///     Vector3::zeros(),
///     Vector3::zeros(),
///     FitterConfig::for_depth(),
/// )
/// .unwrap();
/// fitter.set_max_depth(10.0).unwrap();
/// fitter.set_image(&Image::filled(32, 32, 1, 10.0), None, None).unwrap();
///
/// let result = fitter.step().unwrap();
/// assert_eq!(result.energy, result.data_energy + result.rigidity_energy);
/// ```
#[derive(Debug)]
pub struct MeshDepthFitter<R: DifferentiableRenderer = Scene3D> {
    mesh: TriMesh,
    renderer: R,
    rigidity: LaplacianRigidEnergy,
    config: FitterConfig,
    session: Session,
    camera_center: Point3<f64>,
    target: Option<Target>,
    depth_scale: f64,
}

impl MeshDepthFitter<Scene3D> {
    /// Build a fitter rendering with [`Scene3D`].
    ///
    /// `euler_init` are extrinsic z-y-x Euler angles of the initial rotation.
    pub fn new(
        vertices: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        euler_init: Vector3<f64>,
        translation_init: Vector3<f64>,
        config: FitterConfig,
    ) -> Result<Self> {
        let renderer = Scene3D::new().with_parallel(config.parallel);
        Self::with_renderer(vertices, faces, euler_init, translation_init, config, renderer)
    }
}

impl<R: DifferentiableRenderer> MeshDepthFitter<R> {
    /// Build a fitter around any differentiable renderer.
    ///
    /// The input vertices are both the rigidity reference and the state
    /// restored by [`Fitter::reset`].
    pub fn with_renderer(
        vertices: Vec<Point3<f64>>,
        faces: Vec<[usize; 3]>,
        euler_init: Vector3<f64>,
        translation_init: Vector3<f64>,
        config: FitterConfig,
        renderer: R,
    ) -> Result<Self> {
        config.validate()?;
        let mesh = TriMesh::new(faces, vertices.clone())?;
        let rigidity = LaplacianRigidEnergy::new(&mesh, &vertices, config.cregu)?;
        let camera_center = centroid(&vertices) + Vector3::from(CAMERA_OFFSET) * object_radius(&vertices);
        let session = Session::new(FitState {
            vertices,
            quaternion: quaternion_from_euler_zyx(&euler_init),
            translation: translation_init,
            appearance: None,
        });

        Ok(Self {
            mesh,
            renderer,
            rigidity,
            config,
            session,
            camera_center,
            target: None,
            depth_scale: 1.0,
        })
    }

    /// Depth shown where the mesh is absent; rendered depths are clamped to
    /// `[0, max_depth]`.
    pub fn set_max_depth(&mut self, max_depth: f64) -> Result<()> {
        if !max_depth.is_finite() || max_depth <= 0.0 {
            return Err(FitError::invalid_param(
                "max_depth",
                max_depth,
                "must be finite and positive",
            ));
        }
        self.renderer.set_max_depth(max_depth);
        Ok(())
    }

    /// Factor applied to camera-frame depth before comparison.
    pub fn set_depth_scale(&mut self, depth_scale: f64) -> Result<()> {
        if !depth_scale.is_finite() || depth_scale <= 0.0 {
            return Err(FitError::invalid_param(
                "depth_scale",
                depth_scale,
                "must be finite and positive",
            ));
        }
        self.depth_scale = depth_scale;
        Ok(())
    }

    /// Bind a single-channel target depth map and build the camera. Resets
    /// the iteration counter.
    ///
    /// # Errors
    ///
    /// [`FitError::Precondition`] if `depth` has more than one channel.
    pub fn set_image(
        &mut self,
        depth: &Image,
        focal: Option<f64>,
        distortion: Option<Distortion>,
    ) -> Result<()> {
        self.target = Some(Target::new(depth, 1, &self.camera_center, focal, distortion)?);
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
        let (target, max_depth) = ready(&self.target, &self.renderer)?;
        let state = &self.session.current;
        let (_, transformed) =
            RigidTransform::forward(&state.vertices, &state.quaternion, &state.translation, self.config.parallel)?;
        self.mesh.set_vertices(transformed)?;
        let rendering =
            self.renderer
                .render_depth(&target.camera, &self.mesh, target.camera.resolution(), self.depth_scale)?;
        Ok(clamp_depth(&rendering.image, max_depth).0)
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

    /// The camera built by [`MeshDepthFitter::set_image`].
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

fn ready<'a, R: DifferentiableRenderer>(target: &'a Option<Target>, renderer: &R) -> Result<(&'a Target, f64)> {
    let target = target
        .as_ref()
        .ok_or_else(|| FitError::precondition("set_image must be called before rendering"))?;
    let max_depth = renderer
        .max_depth()
        .ok_or_else(|| FitError::precondition("set_max_depth must be called before rendering"))?;
    Ok((target, max_depth))
}

impl<R: DifferentiableRenderer> Fitter for MeshDepthFitter<R> {
    fn step(&mut self) -> Result<StepResult> {
        let (target, max_depth) = ready(&self.target, &self.renderer)?;

        let vertices = centered(&self.session.current.vertices);
        let (transform, transformed) = RigidTransform::forward(
            &vertices,
            &self.session.current.quaternion,
            &self.session.current.translation,
            self.config.parallel,
        )?;
        self.mesh.set_vertices(transformed)?;
        let rendering =
            self.renderer
                .render_depth(&target.camera, &self.mesh, target.camera.resolution(), self.depth_scale)?;
        let (rendered, inside) = clamp_depth(&rendering.image, max_depth);

        let data = DataTerm::eval(&rendered, &target.image, Some(&inside))?;
        let rigidity = self.rigidity.eval(&vertices)?;
        let energy = data.energy + rigidity.energy;
        ensure_finite_energy(energy)?;

        let render_grads = self.renderer.backward(&rendering, &data.gradient)?;
        let pose = transform.backward(&render_grads.vertices);
        let grads = GroupGradients {
            vertices: pose
                .vertices
                .iter()
                .zip(&rigidity.gradient)
                .map(|(d, r)| d + r)
                .collect(),
            quaternion: pose.quaternion,
            translation: pose.translation,
            appearance: None,
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
        let (state, speeds) = apply_update(&self.session, &self.config, &grads, vertices)?;
        self.session.current = state;
        self.session.speeds = speeds;
        self.session.iteration += 1;

        Ok(StepResult {
            energy,
            data_energy: data.energy,
            rigidity_energy,
            rendered,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::Progress;
    use crate::mesh::icosphere;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sphere_fitter(euler: Vector3<f64>) -> MeshDepthFitter {
        let sphere = icosphere(2).unwrap();
        let mut fitter = MeshDepthFitter::new(
            sphere.vertices().to_vec(),
            sphere.faces().to_vec(),
            euler,
            Vector3::zeros(),
            FitterConfig::for_depth(),
        )
        .unwrap();
        fitter.set_max_depth(10.0).unwrap();
        fitter
    }

    /// Depth map of the fitter's own initial state.
    fn self_target(fitter: &mut MeshDepthFitter) -> Image {
        fitter.set_image(&Image::zeros(40, 40, 1), None, None).unwrap();
        let target = fitter.preview().unwrap();
        fitter.set_image(&target, None, None).unwrap();
        target
    }

    #[test]
    fn test_step_requires_image_and_max_depth() {
        let sphere = icosphere(1).unwrap();
        let mut fitter = MeshDepthFitter::new(
            sphere.vertices().to_vec(),
            sphere.faces().to_vec(),
            Vector3::zeros(),
            Vector3::zeros(),
            FitterConfig::for_depth(),
        )
        .unwrap();
        assert!(matches!(fitter.step(), Err(FitError::Precondition(_))));

        fitter.set_image(&Image::zeros(16, 16, 1), None, None).unwrap();
        assert!(matches!(fitter.step(), Err(FitError::Precondition(_))));

        fitter.set_max_depth(10.0).unwrap();
        assert!(fitter.step().is_ok());
    }

    #[test]
    fn test_rgb_image_is_rejected() {
        let mut fitter = sphere_fitter(Vector3::zeros());
        let result = fitter.set_image(&Image::zeros(16, 16, 3), None, None);
        assert!(matches!(result, Err(FitError::Precondition(_))));
    }

    #[test]
    fn test_own_render_has_zero_energy() {
        let mut fitter = sphere_fitter(Vector3::new(0.2, 0.1, -0.3));
        let target = self_target(&mut fitter);
        // The sphere is visible and in front of the background
        assert!(target.as_slice().iter().any(|d| *d < 10.0));

        let result = fitter.step().unwrap();
        assert!(result.data_energy < 1e-9, "data energy {}", result.data_energy);
        assert!(result.rigidity_energy < 1e-9);
        assert!(result.energy < 1e-9);
    }

    #[test]
    fn test_step_invariants() {
        let mut fitter = sphere_fitter(Vector3::zeros());
        self_target(&mut fitter);
        fitter.set_mesh_transform_init(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.05, -0.03, 0.0));
        fitter.reset();

        for _ in 0..5 {
            let result = fitter.step().unwrap();
            assert!(result.energy.is_finite() && result.energy >= 0.0);
            assert_eq!(result.energy, result.data_energy + result.rigidity_energy);
            assert!((fitter.quaternion().norm() - 1.0).abs() < 1e-12);
            assert_eq!(result.diff.shape(), (40, 40));
            assert!((result.diff.sum() - result.data_energy).abs() < 1e-9 * (1.0 + result.data_energy));
        }
        assert_eq!(fitter.iteration(), 5);
        // Depth steps keep the stored vertices centered
        assert!(centroid(&fitter.state().vertices).coords.norm() < 1e-9);
    }

    #[test]
    fn test_reset_reproduces_first_step() {
        let mut fitter = sphere_fitter(Vector3::zeros());
        self_target(&mut fitter);
        fitter.set_mesh_transform_init(Vector3::zeros(), Vector3::new(0.1, 0.0, 0.0));
        fitter.reset();
        assert!(fitter.speeds().is_zero());

        let first = fitter.step().unwrap();
        fitter.step().unwrap();
        assert!(!fitter.speeds().is_zero());

        fitter.reset();
        assert!(fitter.speeds().is_zero());
        assert_eq!(fitter.iteration(), 2);
        let again = fitter.step().unwrap();
        assert_eq!(first.energy, again.energy);
        assert_eq!(first.rendered, again.rendered);
    }

    #[test]
    fn test_translation_offset_is_reduced() {
        let mut fitter = sphere_fitter(Vector3::zeros());
        self_target(&mut fitter);
        fitter.set_mesh_transform_init(Vector3::zeros(), Vector3::new(0.08, 0.0, 0.0));
        fitter.reset();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let progress = Progress::new(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let results = fitter.run(15, &progress).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 15);
        // Default steps oscillate; only the best iterate is compared.
        let best = results
            .iter()
            .skip(1)
            .map(|r| r.energy)
            .fold(f64::INFINITY, f64::min);
        assert!(best < results[0].energy, "best {} first {}", best, results[0].energy);
        assert!(results.iter().all(|r| r.energy.is_finite()));
    }
}
