use glam::{Quat, Vec2, Vec3};

use crate::binary::ByteCursor;
use crate::error::Result;
use crate::kmp::kmp_struct::{Trs, TrsArray};

pub(crate) const VEC2_SIZE: usize = 8;
pub(crate) const VEC3_SIZE: usize = 12;
pub(crate) const QUAT_SIZE: usize = 16;

pub(crate) fn read_vec2(cursor: &mut ByteCursor) -> Result<Vec2> {
    Ok(Vec2::new(cursor.read_f32()?, cursor.read_f32()?))
}

pub(crate) fn read_vec3(cursor: &mut ByteCursor) -> Result<Vec3> {
    Ok(Vec3::new(
        cursor.read_f32()?,
        cursor.read_f32()?,
        cursor.read_f32()?,
    ))
}

/// Rotations are stored x, y, z, w.
pub(crate) fn read_quat(cursor: &mut ByteCursor) -> Result<Quat> {
    Ok(Quat::from_xyzw(
        cursor.read_f32()?,
        cursor.read_f32()?,
        cursor.read_f32()?,
        cursor.read_f32()?,
    ))
}

pub(crate) fn read_trs(cursor: &mut ByteCursor) -> Result<Trs> {
    Ok(Trs {
        scale: read_vec3(cursor)?,
        rotation: read_quat(cursor)?,
        translation: read_vec3(cursor)?,
    })
}

/// Reads `count` scales, then `count` rotations, then `count` translations.
pub(crate) fn read_trs_array(cursor: &mut ByteCursor, count: usize) -> Result<TrsArray> {
    cursor.require(count, VEC3_SIZE * 2 + QUAT_SIZE)?;
    Ok(TrsArray {
        scale: cursor.read_array(count, read_vec3)?,
        rotation: cursor.read_array(count, read_quat)?,
        translation: cursor.read_array(count, read_vec3)?,
    })
}
