//! ### English
//! Quad programs for the GL backend.
//!
//! Every program shares one vertex stage that builds the quad from `gl_VertexID` (no vertex
//! buffers). `Solid` and `Textured` are required; the rest fall back to `Textured` when they fail
//! to build, which keeps content on screen with reduced styling.
//!
//! ### 中文
//! GL 后端的四边形着色程序。
//!
//! 所有程序共用一个顶点阶段，由 `gl_VertexID` 生成四边形（无顶点缓冲）。`Solid` 与 `Textured`
//! 为必需；其余程序构建失败时回退到 `Textured`，内容仍会显示，只是样式减少。

use glow::HasContext as _;

use crate::engine::error::OverlayError;

const VERTEX: &str = r#"
uniform vec4 u_dst;
uniform vec4 u_uv;
out vec2 v_uv;
out vec2 v_local;
void main() {
    vec2 corner = vec2(float(gl_VertexID & 1), float((gl_VertexID >> 1) & 1));
    v_local = corner;
    vec2 uv = mix(u_uv.xy, u_uv.zw, corner);
    v_uv = vec2(uv.x, 1.0 - uv.y);
    gl_Position = vec4(mix(u_dst.xy, u_dst.zw, corner), 0.0, 1.0);
}
"#;

const FRAGMENT_COMMON: &str = r#"
in vec2 v_uv;
in vec2 v_local;
out vec4 frag_color;
uniform sampler2D u_tex;
uniform vec4 u_tint;
uniform float u_opacity;
uniform int u_premultiplied;
vec4 finish(vec4 c) {
    c.a *= u_opacity;
    if (u_premultiplied == 1) {
        c.rgb *= u_opacity;
    }
    return c;
}
"#;

const SOLID: &str = r#"
void main() {
    frag_color = finish(u_tint);
}
"#;

const TEXTURED: &str = r#"
void main() {
    frag_color = finish(texture(u_tex, v_uv) * u_tint);
}
"#;

const COLOR_KEY: &str = r#"
uniform vec4 u_key;
uniform float u_sensitivity;
void main() {
    vec4 texel = texture(u_tex, v_uv);
    if (distance(texel.rgb, u_key.rgb) <= u_sensitivity) {
        discard;
    }
    frag_color = finish(texel * u_tint);
}
"#;

const GRADIENT: &str = r#"
uniform vec4 u_top;
uniform vec4 u_bottom;
void main() {
    frag_color = finish(mix(u_top, u_bottom, v_local.y));
}
"#;

const BORDER: &str = r#"
uniform vec2 u_size;
uniform float u_thickness;
uniform float u_radius;
uniform int u_circle;
void main() {
    vec2 p = v_local * u_size;
    if (u_circle == 1) {
        vec2 axes = u_size * 0.5;
        vec2 d = p - axes;
        if (dot(d / axes, d / axes) > 1.0) {
            discard;
        }
        vec2 inner = axes - vec2(u_thickness);
        if (inner.x > 0.0 && inner.y > 0.0 && dot(d / inner, d / inner) < 1.0) {
            discard;
        }
        frag_color = finish(u_tint);
        return;
    }
    float r = max(min(u_radius, min(u_size.x, u_size.y) * 0.5), 0.0);
    vec2 q = max(max(vec2(r) - p, p - (u_size - vec2(r))), vec2(0.0));
    if (r > 0.0 && q.x > 0.0 && q.y > 0.0) {
        float inward = r - length(q);
        if (inward < 0.0 || inward >= u_thickness) {
            discard;
        }
    } else {
        float edge = min(min(p.x, p.y), min(u_size.x - p.x, u_size.y - p.y));
        if (edge >= u_thickness) {
            discard;
        }
    }
    frag_color = finish(u_tint);
}
"#;

const MIRROR_FILTER: &str = r#"
uniform vec4 u_targets[8];
uniform int u_count;
uniform vec4 u_output;
uniform float u_sensitivity;
void main() {
    vec4 texel = texture(u_tex, v_uv);
    bool hit = false;
    if (texel.a > 0.0) {
        for (int i = 0; i < u_count; ++i) {
            if (distance(texel.rgb, u_targets[i].rgb) <= u_sensitivity) {
                hit = true;
            }
        }
    }
    frag_color = finish(hit ? u_output : vec4(0.0));
}
"#;

const DYNAMIC_BORDER: &str = r#"
uniform float u_thickness;
uniform vec4 u_color;
uniform vec2 u_texel;
void main() {
    vec4 texel = texture(u_tex, v_uv);
    if (texel.a > 0.0) {
        frag_color = finish(texel);
        return;
    }
    int reach = int(min(ceil(u_thickness), 8.0));
    for (int y = -reach; y <= reach; ++y) {
        for (int x = -reach; x <= reach; ++x) {
            if (length(vec2(x, y)) <= u_thickness
                && texture(u_tex, v_uv + vec2(x, y) * u_texel).a > 0.0) {
                frag_color = finish(u_color);
                return;
            }
        }
    }
    frag_color = vec4(0.0);
}
"#;

const COMMON_UNIFORMS: [&str; 6] = [
    "u_dst",
    "u_uv",
    "u_tex",
    "u_tint",
    "u_opacity",
    "u_premultiplied",
];

/// ### English
/// Program slots, indexable by `as usize`.
///
/// ### 中文
/// 程序槽位，可通过 `as usize` 索引。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ProgramKind {
    Solid,
    Textured,
    ColorKey,
    Gradient,
    Border,
    MirrorFilter,
    DynamicBorder,
}

impl ProgramKind {
    const ALL: [ProgramKind; 7] = [
        ProgramKind::Solid,
        ProgramKind::Textured,
        ProgramKind::ColorKey,
        ProgramKind::Gradient,
        ProgramKind::Border,
        ProgramKind::MirrorFilter,
        ProgramKind::DynamicBorder,
    ];

    fn name(self) -> &'static str {
        match self {
            ProgramKind::Solid => "solid",
            ProgramKind::Textured => "textured",
            ProgramKind::ColorKey => "color_key",
            ProgramKind::Gradient => "gradient",
            ProgramKind::Border => "border",
            ProgramKind::MirrorFilter => "mirror_filter",
            ProgramKind::DynamicBorder => "dynamic_border",
        }
    }

    fn body(self) -> &'static str {
        match self {
            ProgramKind::Solid => SOLID,
            ProgramKind::Textured => TEXTURED,
            ProgramKind::ColorKey => COLOR_KEY,
            ProgramKind::Gradient => GRADIENT,
            ProgramKind::Border => BORDER,
            ProgramKind::MirrorFilter => MIRROR_FILTER,
            ProgramKind::DynamicBorder => DYNAMIC_BORDER,
        }
    }

    fn extra_uniforms(self) -> &'static [&'static str] {
        match self {
            ProgramKind::Solid | ProgramKind::Textured => &[],
            ProgramKind::ColorKey => &["u_key", "u_sensitivity"],
            ProgramKind::Gradient => &["u_top", "u_bottom"],
            ProgramKind::Border => &["u_size", "u_thickness", "u_radius", "u_circle"],
            ProgramKind::MirrorFilter => &["u_targets", "u_count", "u_output", "u_sensitivity"],
            ProgramKind::DynamicBorder => &["u_thickness", "u_color", "u_texel"],
        }
    }

    fn required(self) -> bool {
        matches!(self, ProgramKind::Solid | ProgramKind::Textured)
    }
}

pub(super) struct Program {
    pub(super) handle: glow::Program,
    uniforms: Vec<(&'static str, Option<glow::UniformLocation>)>,
}

impl Program {
    pub(super) fn uniform(&self, name: &str) -> Option<&glow::UniformLocation> {
        self.uniforms
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .and_then(|(_, location)| location.as_ref())
    }
}

unsafe fn compile_stage(
    glow: &glow::Context,
    stage: u32,
    source: &str,
    program: &'static str,
) -> Result<glow::Shader, OverlayError> {
    unsafe {
        let shader = glow
            .create_shader(stage)
            .map_err(|log| OverlayError::ShaderCompile { program, log })?;
        glow.shader_source(shader, source);
        glow.compile_shader(shader);
        if !glow.get_shader_compile_status(shader) {
            let log = glow.get_shader_info_log(shader);
            glow.delete_shader(shader);
            return Err(OverlayError::ShaderCompile { program, log });
        }
        Ok(shader)
    }
}

unsafe fn build(
    glow: &glow::Context,
    header: &str,
    kind: ProgramKind,
) -> Result<Program, OverlayError> {
    let program_name = kind.name();
    let vertex_source = format!("{header}{VERTEX}");
    let fragment_source = format!("{header}{FRAGMENT_COMMON}{}", kind.body());

    unsafe {
        let vertex = compile_stage(glow, glow::VERTEX_SHADER, &vertex_source, program_name)?;
        let fragment =
            match compile_stage(glow, glow::FRAGMENT_SHADER, &fragment_source, program_name) {
                Ok(fragment) => fragment,
                Err(err) => {
                    glow.delete_shader(vertex);
                    return Err(err);
                }
            };

        let handle = match glow.create_program() {
            Ok(handle) => handle,
            Err(log) => {
                glow.delete_shader(vertex);
                glow.delete_shader(fragment);
                return Err(OverlayError::ShaderLink {
                    program: program_name,
                    log,
                });
            }
        };
        glow.attach_shader(handle, vertex);
        glow.attach_shader(handle, fragment);
        glow.link_program(handle);
        glow.detach_shader(handle, vertex);
        glow.detach_shader(handle, fragment);
        glow.delete_shader(vertex);
        glow.delete_shader(fragment);

        if !glow.get_program_link_status(handle) {
            let log = glow.get_program_info_log(handle);
            glow.delete_program(handle);
            return Err(OverlayError::ShaderLink {
                program: program_name,
                log,
            });
        }

        let uniforms = COMMON_UNIFORMS
            .iter()
            .chain(kind.extra_uniforms())
            .map(|&name| (name, glow.get_uniform_location(handle, name)))
            .collect();
        Ok(Program { handle, uniforms })
    }
}

/// ### English
/// All quad programs of one context.
///
/// ### 中文
/// 单个上下文的全部四边形程序。
pub(super) struct Programs {
    slots: [Option<Program>; 7],
}

impl Programs {
    pub(super) fn build_all(glow: &glow::Context, is_gles: bool) -> Result<Self, OverlayError> {
        let header = if is_gles {
            "#version 300 es\nprecision highp float;\nprecision highp int;\n"
        } else {
            "#version 330 core\n"
        };

        let mut slots: [Option<Program>; 7] = Default::default();
        for kind in ProgramKind::ALL {
            match unsafe { build(glow, header, kind) } {
                Ok(program) => slots[kind as usize] = Some(program),
                Err(err) if kind.required() => {
                    let mut partial = Self { slots };
                    partial.delete(glow);
                    return Err(err);
                }
                Err(err) => log::warn!("{err}; {} falls back to textured", kind.name()),
            }
        }
        Ok(Self { slots })
    }

    /// ### English
    /// Program for `kind`, or the textured fallback; also returns which one was chosen.
    ///
    /// ### 中文
    /// 返回 `kind` 对应的程序或 textured 回退程序，并告知实际选择的是哪一个。
    pub(super) fn get(&self, kind: ProgramKind) -> Option<(&Program, ProgramKind)> {
        if let Some(program) = &self.slots[kind as usize] {
            return Some((program, kind));
        }
        self.slots[ProgramKind::Textured as usize]
            .as_ref()
            .map(|program| (program, ProgramKind::Textured))
    }

    pub(super) fn delete(&mut self, glow: &glow::Context) {
        for program in self.slots.iter_mut().filter_map(Option::take) {
            unsafe { glow.delete_program(program.handle) };
        }
    }
}
