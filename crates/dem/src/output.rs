//! Per-sphere and per-contact row schemas (§6). No CSV writer is provided —
//! file I/O is a Non-goal — only the row types and a column projection, so a
//! caller that does own a writer can select and order the fields it wants.

use crate::scene::Quaternion;

/// Selectable per-sphere output columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Column {
    Xyz,
    Quat,
    AbsV,
    Vel,
    AngVel,
    Acc,
    AngAcc,
    Family,
    Mat,
    ExpFactor,
}

/// One sphere's full output row; `selected_columns` projects down to the
/// fields a caller actually wants, in order.
#[derive(Copy, Clone, Debug)]
pub struct SphereRow {
    pub pos: [f64; 3],
    pub ori: Quaternion,
    pub vel: [f64; 3],
    pub ang_vel: [f64; 3],
    pub acc: [f64; 3],
    pub ang_acc: [f64; 3],
    pub family: u32,
    pub material: u32,
    pub expand_factor: f64,
}

/// A single scalar or vector field value, as selected by one [`Column`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Vec3([f64; 3]),
    Quat([f64; 4]),
    Scalar(f64),
    Index(u32),
}

impl SphereRow {
    #[must_use]
    pub fn selected_columns(&self, columns: &[Column]) -> Vec<FieldValue> {
        columns
            .iter()
            .map(|column| match column {
                Column::Xyz => FieldValue::Vec3(self.pos),
                Column::Quat => FieldValue::Quat(self.ori.0),
                Column::AbsV => FieldValue::Scalar(norm(self.vel)),
                Column::Vel => FieldValue::Vec3(self.vel),
                Column::AngVel => FieldValue::Vec3(self.ang_vel),
                Column::Acc => FieldValue::Vec3(self.acc),
                Column::AngAcc => FieldValue::Vec3(self.ang_acc),
                Column::Family => FieldValue::Index(self.family),
                Column::Mat => FieldValue::Index(self.material),
                Column::ExpFactor => FieldValue::Scalar(self.expand_factor),
            })
            .collect()
    }
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Selectable per-contact-pair output columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContactColumn {
    Owners,
    Force,
    Point,
    Component,
    Normal,
    TorqueOnlyForce,
}

/// One contact's full output row.
#[derive(Copy, Clone, Debug)]
pub struct ContactRow {
    pub owner_a: u32,
    pub owner_b: u32,
    pub force: [f64; 3],
    pub point: [f64; 3],
    pub component: u32,
    pub normal: [f64; 3],
    pub torque_only_force: [f64; 3],
}

impl ContactRow {
    #[must_use]
    pub fn selected_columns(&self, columns: &[ContactColumn]) -> Vec<FieldValue> {
        columns
            .iter()
            .map(|column| match column {
                ContactColumn::Owners => FieldValue::Vec3([f64::from(self.owner_a), f64::from(self.owner_b), 0.0]),
                ContactColumn::Force => FieldValue::Vec3(self.force),
                ContactColumn::Point => FieldValue::Vec3(self.point),
                ContactColumn::Component => FieldValue::Index(self.component),
                ContactColumn::Normal => FieldValue::Vec3(self.normal),
                ContactColumn::TorqueOnlyForce => FieldValue::Vec3(self.torque_only_force),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_columns_projects_in_requested_order() {
        let row = SphereRow {
            pos: [1.0, 2.0, 3.0],
            ori: Quaternion::default(),
            vel: [3.0, 4.0, 0.0],
            ang_vel: [0.0; 3],
            acc: [0.0; 3],
            ang_acc: [0.0; 3],
            family: 2,
            material: 0,
            expand_factor: 1.0,
        };
        let selected = row.selected_columns(&[Column::AbsV, Column::Xyz]);
        assert_eq!(selected[0], FieldValue::Scalar(5.0));
        assert_eq!(selected[1], FieldValue::Vec3([1.0, 2.0, 3.0]));
    }
}
