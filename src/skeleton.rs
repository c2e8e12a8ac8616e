//! Bind-pose resolution for KMP skeletons.
//!
//! Each bone stores the inverse of its parent-relative bind transform and
//! animation frames follow the same rule. Files with a second table also
//! store every bone's absolute bind transform; the skin's inverse bind
//! matrices are then the inverses of that table rather than of the
//! composed hierarchy.
//!
//! `DirectWithInverseBind` is an explicit override for files whose first
//! table is already parent-relative and whose second table already holds
//! inverse bind transforms.

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kmp::kmp_struct::{Skeleton, Trs, TrsArray};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkeletonVariant {
    #[default]
    InverseRelative,
    DirectWithInverseBind,
}

/// Scale, then rotation, then translation of bone `index`.
pub fn compose_local(trs: &TrsArray, index: usize) -> Result<Mat4> {
    trs.get(index)
        .map(|trs| trs.to_matrix())
        .ok_or(Error::IndexOutOfRange {
            what: "bone transform",
            index: index as i64,
            len: trs.len(),
        })
}

fn invert(matrix: Mat4) -> Option<Mat4> {
    let det = matrix.determinant();
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    Some(matrix.inverse())
}

fn decompose(matrix: Mat4) -> Option<Trs> {
    if !matrix.is_finite() {
        return None;
    }
    let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
    if !(scale.is_finite() && rotation.is_finite() && translation.is_finite()) {
        return None;
    }
    Some(Trs {
        scale,
        rotation: rotation.normalize(),
        translation,
    })
}

/// Divides by `m44` so the bottom-right element is exactly one.
fn normalize_homogeneous(matrix: Mat4) -> Option<Mat4> {
    let w = matrix.w_axis.w;
    if w == 0.0 || !w.is_finite() {
        return None;
    }
    let mut normalized = matrix * (1.0 / w);
    normalized.w_axis.w = 1.0;
    Some(normalized)
}

/// Local transform of one animation frame, or `None` if the frame cannot
/// be inverted or decomposed.
pub fn keyframe_trs(variant: SkeletonVariant, frame: &Trs) -> Option<Trs> {
    match variant {
        SkeletonVariant::InverseRelative => decompose(invert(frame.to_matrix())?),
        SkeletonVariant::DirectWithInverseBind => Some(*frame),
    }
}

/// Per-bone local and absolute bind matrices, computed once in bone order.
#[derive(Debug, Clone)]
pub struct BindPoseResolver<'a> {
    skeleton: &'a Skeleton,
    variant: SkeletonVariant,
    local: Vec<Mat4>,
    absolute: Vec<Mat4>,
}

impl<'a> BindPoseResolver<'a> {
    /// Requires every non-root bone to come after its parent.
    pub fn new(skeleton: &'a Skeleton, variant: SkeletonVariant) -> Result<Self> {
        let bone_count = skeleton.bone_count();
        for (bone, &parent) in skeleton.parents.iter().enumerate() {
            if parent != -1 && (parent < 0 || parent as usize >= bone) {
                return Err(Error::BoneOrder { bone, parent });
            }
        }
        if skeleton.transforms.len() != bone_count {
            return Err(Error::IndexOutOfRange {
                what: "bone transform",
                index: bone_count as i64,
                len: skeleton.transforms.len(),
            });
        }
        match (&skeleton.absolute_transforms, variant) {
            (Some(table), _) if table.len() != bone_count => {
                return Err(Error::IndexOutOfRange {
                    what: "absolute bind transform",
                    index: bone_count as i64,
                    len: table.len(),
                });
            }
            (None, SkeletonVariant::DirectWithInverseBind) => {
                return Err(Error::MissingInverseBindTable)
            }
            _ => {}
        }

        let mut local = Vec::with_capacity(bone_count);
        for bone in 0..bone_count {
            let stored = compose_local(&skeleton.transforms, bone)?;
            let matrix = match variant {
                SkeletonVariant::InverseRelative => {
                    invert(stored).ok_or(Error::SingularBindPose { bone })?
                }
                SkeletonVariant::DirectWithInverseBind => stored,
            };
            local.push(matrix);
        }

        // Parents precede children, so one forward pass fills the cache.
        let mut absolute: Vec<Mat4> = Vec::with_capacity(bone_count);
        for bone in 0..bone_count {
            let matrix = match skeleton.parents[bone] {
                -1 => local[bone],
                parent => absolute[parent as usize] * local[bone],
            };
            absolute.push(matrix);
        }

        Ok(Self {
            skeleton,
            variant,
            local,
            absolute,
        })
    }

    pub fn variant(&self) -> SkeletonVariant {
        self.variant
    }

    pub fn bone_count(&self) -> usize {
        self.local.len()
    }

    fn check(&self, bone: usize) -> Result<()> {
        if bone >= self.bone_count() {
            return Err(Error::IndexOutOfRange {
                what: "bone",
                index: bone as i64,
                len: self.bone_count(),
            });
        }
        Ok(())
    }

    /// Parent-relative bind matrix of `bone`.
    pub fn local_bind(&self, bone: usize) -> Result<Mat4> {
        self.check(bone)?;
        Ok(self.local[bone])
    }

    pub fn absolute_bind(&self, bone: usize) -> Result<Mat4> {
        self.check(bone)?;
        Ok(self.absolute[bone])
    }

    /// Inverse bind matrix with `m44 == 1`. A stored absolute table takes
    /// precedence over the composed hierarchy.
    pub fn inverse_bind(&self, bone: usize) -> Result<Mat4> {
        self.check(bone)?;
        let table = self.skeleton.absolute_transforms.as_ref();
        let inverse = match (self.variant, table) {
            (SkeletonVariant::DirectWithInverseBind, Some(table)) => compose_local(table, bone)?,
            (SkeletonVariant::DirectWithInverseBind, None) => {
                return Err(Error::MissingInverseBindTable)
            }
            (SkeletonVariant::InverseRelative, Some(table)) => {
                invert(compose_local(table, bone)?).ok_or(Error::SingularBindPose { bone })?
            }
            (SkeletonVariant::InverseRelative, None) => {
                invert(self.absolute[bone]).ok_or(Error::SingularBindPose { bone })?
            }
        };
        normalize_homogeneous(inverse).ok_or(Error::SingularBindPose { bone })
    }

    pub fn inverse_bind_matrices(&self) -> Result<Vec<Mat4>> {
        (0..self.bone_count())
            .map(|bone| self.inverse_bind(bone))
            .collect()
    }

    /// Node-ready local transform of `bone`.
    pub fn local_trs(&self, bone: usize) -> Result<Trs> {
        self.check(bone)?;
        match self.variant {
            SkeletonVariant::InverseRelative => {
                decompose(self.local[bone]).ok_or(Error::BindPoseDecompositionFailed { bone })
            }
            SkeletonVariant::DirectWithInverseBind => self
                .skeleton
                .transforms
                .get(bone)
                .ok_or(Error::BindPoseDecompositionFailed { bone }),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::kmp::kmp_fixture::bone_chain;

    fn skewed_chain() -> Skeleton {
        Skeleton {
            flags: 0,
            parents: vec![-1, 0, 1],
            transforms: [
                Trs {
                    scale: Vec3::splat(2.0),
                    rotation: Quat::from_rotation_y(0.3),
                    translation: Vec3::new(1.0, 0.0, 0.0),
                },
                Trs {
                    scale: Vec3::ONE,
                    rotation: Quat::from_rotation_x(-0.7),
                    translation: Vec3::new(0.0, 2.0, 0.5),
                },
                Trs {
                    scale: Vec3::new(1.0, 0.5, 1.0),
                    rotation: Quat::from_rotation_z(1.1),
                    translation: Vec3::new(0.0, 0.0, -3.0),
                },
            ]
            .into_iter()
            .collect(),
            absolute_transforms: None,
        }
    }

    #[test]
    fn absolute_bind_is_the_product_of_locals() {
        let skeleton = skewed_chain();
        for variant in [
            SkeletonVariant::InverseRelative,
            SkeletonVariant::DirectWithInverseBind,
        ] {
            let mut skeleton = skeleton.clone();
            skeleton.absolute_transforms = Some(skeleton.transforms.clone());
            let resolver = BindPoseResolver::new(&skeleton, variant).unwrap();
            let l0 = resolver.local_bind(0).unwrap();
            let l1 = resolver.local_bind(1).unwrap();
            let l2 = resolver.local_bind(2).unwrap();
            let expected = l0 * l1 * l2;
            assert!(resolver.absolute_bind(2).unwrap().abs_diff_eq(expected, 1e-5));
            assert!(resolver.absolute_bind(1).unwrap().abs_diff_eq(l0 * l1, 1e-5));
        }
    }

    #[test]
    fn inverse_relative_locals_invert_the_stored_transform() {
        let skeleton = skewed_chain();
        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative).unwrap();
        for bone in 0..3 {
            let stored = compose_local(&skeleton.transforms, bone).unwrap();
            let local = resolver.local_bind(bone).unwrap();
            assert!((stored * local).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        }
    }

    #[test]
    fn local_trs_recomposes_to_the_local_matrix() {
        let skeleton = skewed_chain();
        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative).unwrap();
        let trs = resolver.local_trs(1).unwrap();
        assert!(trs
            .to_matrix()
            .abs_diff_eq(resolver.local_bind(1).unwrap(), 1e-4));
    }

    #[test]
    fn inverse_bind_undoes_absolute_bind() {
        let skeleton = skewed_chain();
        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative).unwrap();
        for bone in 0..3 {
            let inverse = resolver.inverse_bind(bone).unwrap();
            assert_eq!(inverse.w_axis.w, 1.0);
            let product = inverse * resolver.absolute_bind(bone).unwrap();
            assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        }
    }

    fn absolute_table(translations: [f32; 2]) -> TrsArray {
        translations
            .into_iter()
            .map(|y| Trs {
                translation: Vec3::new(0.0, y, 0.0),
                ..Trs::default()
            })
            .collect()
    }

    #[test]
    fn absolute_table_is_inverted_for_the_inverse_binds() {
        let mut skeleton = bone_chain(2);
        skeleton.absolute_transforms = Some(absolute_table([1.0, 3.0]));
        assert_eq!(SkeletonVariant::default(), SkeletonVariant::InverseRelative);

        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::default()).unwrap();
        // Nodes still invert the first table.
        let local = resolver.local_trs(1).unwrap();
        assert!(local.translation.abs_diff_eq(Vec3::new(0.0, -1.0, 0.0), 1e-6));
        // The hierarchy puts bone 1 at -2; the stored table says +3.
        let inverse = resolver.inverse_bind(1).unwrap();
        assert!(inverse.abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, -3.0, 0.0)), 1e-6));
        assert_eq!(inverse.w_axis.w, 1.0);
    }

    #[test]
    fn singular_absolute_entry_is_reported() {
        let mut skeleton = bone_chain(2);
        let mut table = absolute_table([1.0, 2.0]);
        table.scale[1] = Vec3::ZERO;
        skeleton.absolute_transforms = Some(table);
        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative).unwrap();
        assert!(resolver.inverse_bind(0).is_ok());
        assert!(matches!(
            resolver.inverse_bind(1),
            Err(Error::SingularBindPose { bone: 1 })
        ));
    }

    #[test]
    fn short_absolute_table_is_rejected() {
        let mut skeleton = bone_chain(3);
        skeleton.absolute_transforms = Some(absolute_table([1.0, 2.0]));
        assert!(matches!(
            BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative),
            Err(Error::IndexOutOfRange { what: "absolute bind transform", index: 3, len: 2 })
        ));
    }

    #[test]
    fn direct_override_uses_the_tables_as_stored() {
        let mut skeleton = bone_chain(2);
        skeleton.absolute_transforms = Some(absolute_table([-1.0, -2.0]));

        let resolver =
            BindPoseResolver::new(&skeleton, SkeletonVariant::DirectWithInverseBind).unwrap();
        assert_eq!(resolver.local_trs(1).unwrap(), skeleton.transforms.get(1).unwrap());
        assert_eq!(
            resolver.inverse_bind(1).unwrap(),
            Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0))
        );
        assert!(resolver
            .absolute_bind(1)
            .unwrap()
            .abs_diff_eq(Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0)), 1e-6));
    }

    #[test]
    fn direct_override_needs_the_second_table() {
        let skeleton = bone_chain(2);
        assert!(matches!(
            BindPoseResolver::new(&skeleton, SkeletonVariant::DirectWithInverseBind),
            Err(Error::MissingInverseBindTable)
        ));
    }

    #[test]
    fn children_before_parents_are_rejected() {
        let mut skeleton = bone_chain(3);
        skeleton.parents = vec![-1, 2, 0];
        assert!(matches!(
            BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative),
            Err(Error::BoneOrder { bone: 1, parent: 2 })
        ));

        skeleton.parents = vec![-1, 1, 0];
        assert!(matches!(
            BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative),
            Err(Error::BoneOrder { bone: 1, parent: 1 })
        ));
    }

    #[test]
    fn zero_scale_is_singular() {
        let mut skeleton = bone_chain(2);
        skeleton.transforms.scale[1] = Vec3::ZERO;
        assert!(matches!(
            BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative),
            Err(Error::SingularBindPose { bone: 1 })
        ));
    }

    #[test]
    fn keyframes_follow_the_variant_rule() {
        let frame = Trs {
            scale: Vec3::ONE,
            rotation: Quat::from_rotation_y(0.5),
            translation: Vec3::new(3.0, 0.0, 0.0),
        };
        assert_eq!(
            keyframe_trs(SkeletonVariant::DirectWithInverseBind, &frame),
            Some(frame)
        );

        let inverted = keyframe_trs(SkeletonVariant::InverseRelative, &frame).unwrap();
        let product = frame.to_matrix() * inverted.to_matrix();
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-5));

        let degenerate = Trs {
            scale: Vec3::ZERO,
            ..frame
        };
        assert_eq!(keyframe_trs(SkeletonVariant::InverseRelative, &degenerate), None);
    }

    #[test]
    fn bone_out_of_range_is_reported() {
        let skeleton = bone_chain(1);
        let resolver = BindPoseResolver::new(&skeleton, SkeletonVariant::InverseRelative).unwrap();
        assert!(matches!(
            resolver.inverse_bind(4),
            Err(Error::IndexOutOfRange { what: "bone", .. })
        ));
    }
}
