//! 随任务下发到 Manager 的 Blender Python 脚本
//!
//! 变量在编译时插入到 `##VARS_INSERTED_HERE##` 位置。

pub const VARS_MARKER: &str = "##VARS_INSERTED_HERE##";

pub const PRE_RENDER: &str = r#"import bpy

##VARS_INSERTED_HERE##

scene = bpy.context.scene
scene.render.use_overwrite = True
scene.render.use_placeholder = False

if render_settings:
    bpy.ops.script.python_file_run(filepath=render_settings)
"#;

pub const TILE: &str = r#"import bpy

##VARS_INSERTED_HERE##

scene = bpy.context.scene
render = scene.render

# 按列切分画面，每个分块只渲染自己的区域
render.use_border = True
render.use_crop_to_border = False
render.border_min_x = tile / tiles
render.border_max_x = (tile + 1) / tiles
render.border_min_y = 0.0
render.border_max_y = 1.0
render.image_settings.file_format = 'OPEN_EXR'
"#;

pub const TILE_MIX: &str = r#"import os
import sys

import bpy

##VARS_INSERTED_HERE##

argv = sys.argv[sys.argv.index('--') + 1:] if '--' in sys.argv else []
tiles_dir = argv[argv.index('--tiles-dir') + 1] if '--tiles-dir' in argv else '.'

scene = bpy.context.scene
scene.use_nodes = True
tree = scene.node_tree
for node in list(tree.nodes):
    tree.nodes.remove(node)

composite = tree.nodes.new('CompositorNodeComposite')
previous = None
for tile in range(tiles):
    path = os.path.join(tiles_dir, tiles_path.format(tile=tile, frame=scene.frame_start))
    image = tree.nodes.new('CompositorNodeImage')
    image.image = bpy.data.images.load(path)
    image.image.source = 'SEQUENCE'
    if previous is None:
        previous = image.outputs[0]
        continue
    mix = tree.nodes.new('CompositorNodeAlphaOver')
    tree.links.new(previous, mix.inputs[1])
    tree.links.new(image.outputs[0], mix.inputs[2])
    previous = mix.outputs[0]

tree.links.new(previous, composite.inputs[0])
"#;

pub const BAKE_ANIM_CACHE: &str = r#"import bpy

for obj in bpy.data.objects:
    for modifier in obj.modifiers:
        if modifier.type == 'MESH_CACHE' or not hasattr(modifier, 'point_cache'):
            continue
        override = {'scene': bpy.context.scene, 'point_cache': modifier.point_cache}
        bpy.ops.ptcache.bake(override, bake=True)

bpy.ops.wm.save_mainfile()
"#;

pub const OPENGL_RENDER: &str = r#"import sys

import bpy

argv = sys.argv[sys.argv.index('--') + 1:]

def arg(name):
    return argv[argv.index(name) + 1]

scene = bpy.context.scene
scene.render.filepath = arg('--render-output')
scene.frame_start = int(arg('--frame-start'))
scene.frame_end = int(arg('--frame-end'))
scene.render.image_settings.file_format = arg('--render-format')

bpy.ops.render.opengl(animation=True)
"#;

/// 以 Python 赋值语句的形式插入变量
pub fn render_script(template: &str, vars: &[(&str, PyValue)]) -> String {
    let data = vars
        .iter()
        .map(|(name, value)| format!("{name} = {}", value.to_python()))
        .collect::<Vec<_>>()
        .join("\n");
    template.replace(VARS_MARKER, &data)
}

/// 可以插入脚本的变量值
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    Int(i64),
    Str(String),
    None,
}

impl PyValue {
    fn to_python(&self) -> String {
        match self {
            PyValue::Int(n) => n.to_string(),
            PyValue::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            PyValue::None => "None".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vars_are_inserted() {
        let script = render_script(
            TILE,
            &[("tile", PyValue::Int(2)), ("tiles", PyValue::Int(4))],
        );
        assert!(script.contains("tile = 2\ntiles = 4"));
        assert!(!script.contains(VARS_MARKER));
    }

    #[test]
    fn test_strings_are_quoted() {
        let script = render_script(
            PRE_RENDER,
            &[("render_settings", PyValue::Str("C:\\it's.py".to_string()))],
        );
        assert!(script.contains(r"render_settings = 'C:\\it\'s.py'"));
    }
}
