//! Scanline rasterization with antialiased silhouettes, and its adjoint.
//!
//! The rasterizer works on already-projected vertices carrying an arbitrary
//! number of attribute channels (shaded color, scaled depth, ...):
//!
//! 1. **Interiors**: every triangle is scanned over its pixel bounding box;
//!    attributes and depth are interpolated linearly in screen space from the
//!    barycentric coordinates and resolved with a z-buffer.
//! 2. **Silhouettes**: every silhouette edge (a boundary edge, or an edge
//!    between a front-facing and a back-facing triangle) is extended outward
//!    by a band `sigma` pixels wide. In that band the edge color is blended
//!    over whatever lies beneath, with a weight falling linearly from one on
//!    the edge to zero at distance `sigma`. Pixels already covered by a
//!    nearer surface are left alone.
//!
//! Interiors give gradients with respect to attributes and, through the
//! barycentric coordinates, vertex positions. The bands are what make the
//! image depend smoothly on where the occluding contour lies, so that pose
//! and shape gradients exist at object boundaries too.

use nalgebra::{Matrix3, Point2, Vector2, Vector3};

use crate::image::Image;
use crate::mesh::{opposite_vertex, Edge};

/// Vertices at or behind this camera depth clip their triangles and edges.
const NEAR: f64 = 1e-9;

/// Projected triangles with smaller determinant are skipped.
const MIN_DETERMINANT: f64 = 1e-12;

/// Projected mesh data shared by the forward and backward passes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RasterInput<'a> {
    /// Pixel coordinates of every vertex.
    pub positions: &'a [Point2<f64>],
    /// Camera-frame depth of every vertex.
    pub depths: &'a [f64],
    /// `channels` attribute values per vertex, vertex-major.
    pub attributes: &'a [f64],
    pub channels: usize,
    pub faces: &'a [[usize; 3]],
    /// Silhouette band width in pixels; zero disables antialiasing.
    pub sigma: f64,
}

impl RasterInput<'_> {
    #[inline]
    fn attribute(&self, vertex: usize) -> &[f64] {
        &self.attributes[vertex * self.channels..(vertex + 1) * self.channels]
    }
}

#[derive(Debug, Clone, Copy)]
struct SurfaceSample {
    face: usize,
    bary: [f64; 3],
}

#[derive(Debug, Clone, Copy)]
struct EdgeSample {
    a: usize,
    b: usize,
    /// `+1` or `-1`: which side of `a -> b` the band lies on.
    side: f64,
    /// Position along the edge, in `[0, 1]`.
    s: f64,
    /// Distance from the edge, in `[0, sigma)`.
    d: f64,
    depth: f64,
}

/// Per-pixel record of what the forward pass drew, replayed by the adjoint.
#[derive(Debug, Clone)]
pub struct Fragments {
    width: usize,
    height: usize,
    surface: Vec<Option<SurfaceSample>>,
    overlay: Vec<Option<EdgeSample>>,
    face_inverse: Vec<Option<Matrix3<f64>>>,
    z_buffer: Vec<f64>,
}

impl Fragments {
    /// Number of pixels covered by a triangle interior.
    pub fn covered_pixels(&self) -> usize {
        self.surface.iter().filter(|s| s.is_some()).count()
    }

    /// Number of pixels blended with a silhouette band.
    pub fn silhouette_pixels(&self) -> usize {
        self.overlay.iter().filter(|s| s.is_some()).count()
    }

    /// Depth of the nearest interior at pixel `(x, y)`, `+inf` if none.
    pub fn depth_at(&self, x: usize, y: usize) -> f64 {
        self.z_buffer[y * self.width + x]
    }

    /// `(width, height)`.
    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// Gradients produced by [`rasterize_backward`].
#[derive(Debug, Clone)]
pub(crate) struct RasterGradients {
    /// `dE/d(pixel position)` per vertex.
    pub positions: Vec<Vector2<f64>>,
    /// `dE/d(attribute)`, same layout as [`RasterInput::attributes`].
    pub attributes: Vec<f64>,
}

#[inline]
fn cross2(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Inclusive integer range of pixel centers inside `[lo, hi]`.
fn pixel_range(lo: f64, hi: f64, size: usize) -> Option<(usize, usize)> {
    let start = lo.ceil().max(0.0);
    let end = hi.floor().min(size as f64 - 1.0);
    if !(start <= end) {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Matrix mapping `(x, y, 1)` to barycentric coordinates, if the triangle is
/// in front of the camera and not degenerate on screen.
fn barycentric_transform(input: &RasterInput, face: &[usize; 3]) -> Option<Matrix3<f64>> {
    if face.iter().any(|&v| input.depths[v] <= NEAR) {
        return None;
    }
    let [p0, p1, p2] = face.map(|v| input.positions[v]);
    let m = Matrix3::new(p0.x, p1.x, p2.x, p0.y, p1.y, p2.y, 1.0, 1.0, 1.0);
    if m.determinant().abs() < MIN_DETERMINANT {
        log::trace!("skipping degenerate projected triangle {:?}", face);
        return None;
    }
    m.try_inverse()
}

fn signed_area(input: &RasterInput, face: &[usize; 3]) -> f64 {
    let [p0, p1, p2] = face.map(|v| input.positions[v]);
    0.5 * cross2(&(p1 - p0), &(p2 - p0))
}

/// Endpoints and band side of a silhouette edge, or `None`.
fn silhouette(input: &RasterInput, edge: &Edge) -> Option<(usize, usize, f64)> {
    let [a, b] = edge.vertices;
    if input.depths[a] <= NEAR || input.depths[b] <= NEAR {
        return None;
    }
    let reference = match edge.faces.as_slice() {
        [f] => opposite_vertex(&input.faces[*f], a, b),
        [f, g] => {
            let af = signed_area(input, &input.faces[*f]);
            let ag = signed_area(input, &input.faces[*g]);
            if af * ag >= 0.0 {
                return None;
            }
            opposite_vertex(&input.faces[*f], a, b)
        }
        _ => return None,
    };
    if input.depths[reference] <= NEAR {
        return None;
    }
    let pa = input.positions[a];
    let e = input.positions[b] - pa;
    let c = cross2(&e, &(input.positions[reference] - pa));
    if c == 0.0 {
        return None;
    }
    // The band goes on the side away from the attached triangles
    Some((a, b, -c.signum()))
}

fn interpolate(input: &RasterInput, face: &[usize; 3], bary: &[f64; 3], out: &mut [f64]) {
    out.iter_mut().for_each(|v| *v = 0.0);
    for k in 0..3 {
        let attr = input.attribute(face[k]);
        for (o, a) in out.iter_mut().zip(attr) {
            *o += bary[k] * a;
        }
    }
}

/// Render `input` over `background` (which fixes resolution and channels).
pub(crate) fn rasterize(input: &RasterInput, edges: &[Edge], background: &Image) -> (Image, Fragments) {
    let (width, height) = background.resolution();
    let n_pixels = width * height;
    let channels = input.channels;

    let mut z_buffer = vec![f64::INFINITY; n_pixels];
    let mut surface: Vec<Option<SurfaceSample>> = vec![None; n_pixels];
    let face_inverse: Vec<Option<Matrix3<f64>>> = input
        .faces
        .iter()
        .map(|f| barycentric_transform(input, f))
        .collect();

    for (fi, face) in input.faces.iter().enumerate() {
        let Some(inv) = face_inverse[fi] else {
            continue;
        };
        let pts = face.map(|v| input.positions[v]);
        let (min_x, max_x) = (
            pts[0].x.min(pts[1].x).min(pts[2].x),
            pts[0].x.max(pts[1].x).max(pts[2].x),
        );
        let (min_y, max_y) = (
            pts[0].y.min(pts[1].y).min(pts[2].y),
            pts[0].y.max(pts[1].y).max(pts[2].y),
        );
        let (Some((x0, x1)), Some((y0, y1))) = (
            pixel_range(min_x, max_x, width),
            pixel_range(min_y, max_y, height),
        ) else {
            continue;
        };
        let depths = face.map(|v| input.depths[v]);

        for y in y0..=y1 {
            for x in x0..=x1 {
                let b = inv * Vector3::new(x as f64, y as f64, 1.0);
                if b.x < 0.0 || b.y < 0.0 || b.z < 0.0 {
                    continue;
                }
                let z = b.x * depths[0] + b.y * depths[1] + b.z * depths[2];
                let idx = y * width + x;
                if z < z_buffer[idx] {
                    z_buffer[idx] = z;
                    surface[idx] = Some(SurfaceSample {
                        face: fi,
                        bary: [b.x, b.y, b.z],
                    });
                }
            }
        }
    }

    let mut overlay: Vec<Option<EdgeSample>> = vec![None; n_pixels];
    if input.sigma > 0.0 {
        for edge in edges {
            let Some((a, b, side)) = silhouette(input, edge) else {
                continue;
            };
            let pa = input.positions[a];
            let pb = input.positions[b];
            let e = pb - pa;
            let len_sq = e.norm_squared();
            if len_sq < MIN_DETERMINANT {
                continue;
            }
            let len = len_sq.sqrt();
            let offset = Vector2::new(-e.y, e.x) * (side * input.sigma / len);
            let corners = [pa, pb, pa + offset, pb + offset];
            let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
            let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
            let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
            let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
            let (Some((x0, x1)), Some((y0, y1))) = (
                pixel_range(min_x, max_x, width),
                pixel_range(min_y, max_y, height),
            ) else {
                continue;
            };
            let (za, zb) = (input.depths[a], input.depths[b]);

            for y in y0..=y1 {
                for x in x0..=x1 {
                    let w = Point2::new(x as f64, y as f64) - pa;
                    let s = e.dot(&w) / len_sq;
                    if !(0.0..=1.0).contains(&s) {
                        continue;
                    }
                    let d = side * cross2(&e, &w) / len;
                    if d < 0.0 || d >= input.sigma {
                        continue;
                    }
                    let z = za + s * (zb - za);
                    let idx = y * width + x;
                    if z >= z_buffer[idx] {
                        continue;
                    }
                    if matches!(overlay[idx], Some(existing) if existing.depth <= z) {
                        continue;
                    }
                    overlay[idx] = Some(EdgeSample {
                        a,
                        b,
                        side,
                        s,
                        d,
                        depth: z,
                    });
                }
            }
        }
    }

    let mut image = background.clone();
    let mut under = vec![0.0; channels];
    for idx in 0..n_pixels {
        if let Some(sample) = surface[idx] {
            interpolate(input, &input.faces[sample.face], &sample.bary, &mut under);
        } else {
            under.copy_from_slice(background.pixel_at(idx));
        }
        let out = &mut image.as_mut_slice()[idx * channels..(idx + 1) * channels];
        match overlay[idx] {
            Some(edge) => {
                let alpha = 1.0 - edge.d / input.sigma;
                let (attr_a, attr_b) = (input.attribute(edge.a), input.attribute(edge.b));
                for c in 0..channels {
                    let e = (1.0 - edge.s) * attr_a[c] + edge.s * attr_b[c];
                    out[c] = alpha * e + (1.0 - alpha) * under[c];
                }
            }
            None => out.copy_from_slice(&under),
        }
    }

    let fragments = Fragments {
        width,
        height,
        surface,
        overlay,
        face_inverse,
        z_buffer,
    };
    (image, fragments)
}

/// Adjoint of [`rasterize`]: given `dE/d(image)`, accumulate gradients on the
/// vertex pixel positions and attributes. Occlusion decisions are treated as
/// constants.
pub(crate) fn rasterize_backward(
    input: &RasterInput,
    fragments: &Fragments,
    background: &Image,
    image_grad: &Image,
) -> RasterGradients {
    let channels = input.channels;
    let n_vertices = input.positions.len();
    let mut grad_positions = vec![Vector2::zeros(); n_vertices];
    let mut grad_attributes = vec![0.0; input.attributes.len()];

    let mut g_surface = vec![0.0; channels];
    let mut under = vec![0.0; channels];

    for idx in 0..fragments.width * fragments.height {
        let g = image_grad.pixel_at(idx);
        if g.iter().all(|v| *v == 0.0) {
            continue;
        }
        g_surface.copy_from_slice(g);

        if let Some(edge) = fragments.overlay[idx] {
            if let Some(sample) = fragments.surface[idx] {
                interpolate(input, &input.faces[sample.face], &sample.bary, &mut under);
            } else {
                under.copy_from_slice(background.pixel_at(idx));
            }

            let alpha = 1.0 - edge.d / input.sigma;
            let (a, b) = (edge.a, edge.b);
            let mut g_alpha = 0.0;
            let mut g_s = 0.0;
            for c in 0..channels {
                let attr_a = input.attributes[a * channels + c];
                let attr_b = input.attributes[b * channels + c];
                let e = (1.0 - edge.s) * attr_a + edge.s * attr_b;
                g_alpha += g[c] * (e - under[c]);
                g_s += alpha * g[c] * (attr_b - attr_a);
                grad_attributes[a * channels + c] += (1.0 - edge.s) * alpha * g[c];
                grad_attributes[b * channels + c] += edge.s * alpha * g[c];
                g_surface[c] = (1.0 - alpha) * g[c];
            }
            let g_d = -g_alpha / input.sigma;

            let (x, y) = (idx % fragments.width, idx / fragments.width);
            let pa = input.positions[a];
            let e = input.positions[b] - pa;
            let w = Point2::new(x as f64, y as f64) - pa;
            let len_sq = e.norm_squared();
            let len = len_sq.sqrt();
            let cr = cross2(&e, &w);
            let dot = e.dot(&w);

            let dd_de = (Vector2::new(w.y, -w.x) / len - e * (cr / (len_sq * len))) * edge.side;
            let dd_dw = Vector2::new(-e.y, e.x) * (edge.side / len);
            let ds_de = w / len_sq - e * (2.0 * dot / (len_sq * len_sq));
            let ds_dw = e / len_sq;

            let g_e = dd_de * g_d + ds_de * g_s;
            let g_w = dd_dw * g_d + ds_dw * g_s;
            grad_positions[b] += g_e;
            grad_positions[a] -= g_e + g_w;
        }

        if let Some(sample) = fragments.surface[idx] {
            let face = &input.faces[sample.face];
            let Some(inv) = fragments.face_inverse[sample.face] else {
                continue;
            };
            let mut screen_grad = Vector2::zeros();
            for c in 0..channels {
                let gc = g_surface[c];
                if gc == 0.0 {
                    continue;
                }
                let mut da_dx = 0.0;
                let mut da_dy = 0.0;
                for j in 0..3 {
                    let attr = input.attributes[face[j] * channels + c];
                    da_dx += attr * inv[(j, 0)];
                    da_dy += attr * inv[(j, 1)];
                }
                screen_grad += Vector2::new(da_dx, da_dy) * gc;
            }
            for k in 0..3 {
                let v = face[k];
                for c in 0..channels {
                    grad_attributes[v * channels + c] += sample.bary[k] * g_surface[c];
                }
                grad_positions[v] -= screen_grad * sample.bary[k];
            }
        }
    }

    RasterGradients {
        positions: grad_positions,
        attributes: grad_attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Topology;

    struct Fixture {
        positions: Vec<Point2<f64>>,
        depths: Vec<f64>,
        attributes: Vec<f64>,
        faces: Vec<[usize; 3]>,
        topology: Topology,
    }

    impl Fixture {
        fn input(&self, sigma: f64) -> RasterInput<'_> {
            RasterInput {
                positions: &self.positions,
                depths: &self.depths,
                attributes: &self.attributes,
                channels: 2,
                faces: &self.faces,
                sigma,
            }
        }
    }

    /// Two triangles forming an irregular quad, plus a third triangle behind.
    fn fixture() -> Fixture {
        let positions = vec![
            Point2::new(3.3, 2.7),
            Point2::new(16.2, 4.1),
            Point2::new(14.6, 15.3),
            Point2::new(2.9, 13.8),
            Point2::new(8.1, 1.2),
            Point2::new(18.7, 9.4),
            Point2::new(10.4, 18.2),
        ];
        let depths = vec![2.0, 2.2, 2.5, 2.1, 4.0, 4.2, 3.9];
        let attributes = vec![
            0.9, 0.1, 0.2, 0.8, 0.4, 0.4, 0.7, 0.3, 0.1, 0.6, 0.5, 0.9, 0.3, 0.2,
        ];
        let faces = vec![[0, 1, 2], [0, 2, 3], [4, 5, 6]];
        let topology = Topology::build(&faces, positions.len());
        Fixture {
            positions,
            depths,
            attributes,
            faces,
            topology,
        }
    }

    fn background() -> Image {
        Image::tiled(20, 20, &[0.05, 0.95]).unwrap()
    }

    fn loss(image: &Image, weights: &Image) -> f64 {
        image
            .as_slice()
            .iter()
            .zip(weights.as_slice())
            .map(|(a, b)| a * b)
            .sum()
    }

    fn weights() -> Image {
        let data = (0..20 * 20 * 2)
            .map(|i| ((i as f64) * 0.37).sin())
            .collect();
        Image::new(20, 20, 2, data).unwrap()
    }

    #[test]
    fn test_interior_and_occlusion() {
        let fx = fixture();
        let (image, fragments) = rasterize(&fx.input(0.0), fx.topology.edges(), &background());
        assert!(fragments.covered_pixels() > 100);
        assert_eq!(fragments.silhouette_pixels(), 0);
        // Far corner of the image is background
        assert_eq!(image.pixel(0, 19), &[0.05, 0.95]);
        // The near quad hides the far triangle where they overlap
        assert!(fragments.depth_at(12, 10) < 3.0);
        // Vertex 0 sits off the pixel grid; a pixel next to it interpolates close to its attributes
        let p = image.pixel(4, 3);
        assert!((p[0] - 0.9).abs() < 0.2);
    }

    #[test]
    fn test_silhouette_band() {
        let fx = fixture();
        let (_, fragments) = rasterize(&fx.input(1.0), fx.topology.edges(), &background());
        assert!(fragments.silhouette_pixels() > 10);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let fx = fixture();
        let bg = background();
        let w = weights();
        let input = fx.input(1.0);
        let (_, fragments) = rasterize(&input, fx.topology.edges(), &bg);
        let grads = rasterize_backward(&input, &fragments, &bg, &w);

        let eps = 1e-6;
        let eval = |positions: &[Point2<f64>], attributes: &[f64]| {
            let input = RasterInput {
                positions,
                attributes,
                ..fx.input(1.0)
            };
            let (image, _) = rasterize(&input, fx.topology.edges(), &bg);
            loss(&image, &w)
        };

        for v in 0..fx.positions.len() {
            for k in 0..2 {
                let mut plus = fx.positions.clone();
                let mut minus = fx.positions.clone();
                plus[v][k] += eps;
                minus[v][k] -= eps;
                let fd = (eval(&plus, &fx.attributes) - eval(&minus, &fx.attributes)) / (2.0 * eps);
                let analytic = grads.positions[v][k];
                assert!(
                    (fd - analytic).abs() < 1e-4 * (1.0 + fd.abs()),
                    "position {} axis {}: fd={} analytic={}",
                    v,
                    k,
                    fd,
                    analytic
                );
            }
        }

        for i in 0..fx.attributes.len() {
            let mut plus = fx.attributes.clone();
            let mut minus = fx.attributes.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let fd = (eval(&fx.positions, &plus) - eval(&fx.positions, &minus)) / (2.0 * eps);
            assert!(
                (fd - grads.attributes[i]).abs() < 1e-4 * (1.0 + fd.abs()),
                "attribute {}: fd={} analytic={}",
                i,
                fd,
                grads.attributes[i]
            );
        }
    }

    #[test]
    fn test_behind_camera_is_clipped() {
        let mut fx = fixture();
        fx.depths[4] = -1.0;
        let (_, clipped) = rasterize(&fx.input(1.0), fx.topology.edges(), &background());

        fx.faces.truncate(2);
        fx.topology = Topology::build(&fx.faces, fx.positions.len());
        let (_, quad_only) = rasterize(&fx.input(1.0), fx.topology.edges(), &background());

        assert_eq!(clipped.covered_pixels(), quad_only.covered_pixels());
        assert_eq!(clipped.silhouette_pixels(), quad_only.silhouette_pixels());
    }
}
