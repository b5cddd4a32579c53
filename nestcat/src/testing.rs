use std::path::{Path, PathBuf};

use ndarray::{Array, Array1, ArrayD, IxDyn};

use crate::{
    array::ArrayData,
    codec,
    dataset::{Container, Group, Variable},
};

pub(crate) const TRACKS: usize = 7;
pub(crate) const LEVELS: usize = 2;
pub(crate) const FILL: f32 = -9999.0;

fn array<T>(shape: &[usize], values: Vec<T>) -> ArrayD<T> {
    ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
}

/// A small granule shaped like the along-track swaths this crate is used with.
///
/// Root has dimensions `step` (one per entry of `steps`) and `track`, coordinate variables for
/// both and `var0(step, track)`. `Group1` adds dimension `level` and `var1(step, track)`,
/// `var2(step, track, level)`, whose values are derived from the step values so that order can
/// be checked after concatenation.
///
pub(crate) fn toy_container(steps: &[i16], offset: f32) -> Container {
    let n = steps.len();
    let mut container = Container::new();
    let root = &mut container.root;
    root.attributes.set("title", "toy granule");
    root.add_dimension("step", n).unwrap();
    root.add_dimension("track", TRACKS).unwrap();

    let step = Array1::from(steps.to_vec()).into_dyn();
    root.add_variable(
        Variable::new("step", ["step"], ArrayData::from(step))
            .unwrap()
            .with_attribute("units", "1"),
    )
    .unwrap();

    let track = Array::from_iter(0..TRACKS as i16).into_dyn();
    root.add_variable(Variable::new("track", ["track"], ArrayData::from(track)).unwrap())
        .unwrap();

    let var0 = steps
        .iter()
        .flat_map(|&s| (0..TRACKS).map(move |t| s as f32 + t as f32 / 10.0 + offset))
        .collect();
    root.add_variable(
        Variable::new(
            "var0",
            ["step", "track"],
            ArrayData::from(array(&[n, TRACKS], var0)),
        )
        .unwrap()
        .with_attribute("long_name", "root variable")
        .with_fill_value(FILL),
    )
    .unwrap();

    let mut group1 = Group::new("Group1");
    group1.attributes.set("description", "nested science group");
    group1.add_dimension("level", LEVELS).unwrap();

    let var1 = steps
        .iter()
        .flat_map(|&s| (0..TRACKS).map(move |t| s as f64 * 10.0 + t as f64))
        .collect();
    group1
        .add_variable(
            Variable::new(
                "var1",
                ["step", "track"],
                ArrayData::from(array(&[n, TRACKS], var1)),
            )
            .unwrap(),
        )
        .unwrap();

    let var2 = steps
        .iter()
        .flat_map(|&s| (0..TRACKS * LEVELS).map(move |i| s as f32 + i as f32))
        .collect();
    group1
        .add_variable(
            Variable::new(
                "var2",
                ["step", "track", "level"],
                ArrayData::from(array(&[n, TRACKS, LEVELS], var2)),
            )
            .unwrap()
            .with_fill_value(FILL),
        )
        .unwrap();

    root.add_group(group1).unwrap();

    container
}

/// A granule with the toy layout and no observations: every variable has zero size
pub(crate) fn empty_container() -> Container {
    let mut container = Container::new();
    let root = &mut container.root;
    root.add_dimension("step", 0).unwrap();
    root.add_dimension("track", TRACKS).unwrap();
    root.add_variable(
        Variable::new("step", ["step"], ArrayData::from(array::<i16>(&[0], vec![]))).unwrap(),
    )
    .unwrap();
    root.add_variable(
        Variable::new(
            "var0",
            ["step", "track"],
            ArrayData::from(array::<f32>(&[0, TRACKS], vec![])),
        )
        .unwrap(),
    )
    .unwrap();

    let group1 = root.add_group(Group::new("Group1")).unwrap();
    group1
        .add_variable(
            Variable::new(
                "var1",
                ["step", "track"],
                ArrayData::from(array::<f64>(&[0, TRACKS], vec![])),
            )
            .unwrap(),
        )
        .unwrap();

    container
}

/// Write `container` to `dir/name` with the codec chosen by the name's extension
pub(crate) fn write_container(dir: &Path, name: &str, container: &Container) -> PathBuf {
    let path = dir.join(name);
    codec::persist(container, &path).unwrap();

    path
}
