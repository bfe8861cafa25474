use std::env;
use std::path::{Path, PathBuf};

/// Where the llama.cpp headers and static libraries come from.
struct LlamaInstall {
    lib_dir: PathBuf,
    include_dirs: Vec<PathBuf>,
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    println!("cargo:rerun-if-env-changed=LLAMA_PREBUILT_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");
    println!("cargo:rerun-if-changed=wrapper.h");

    // Two ways to get llama.cpp:
    //
    // * `LLAMA_PREBUILT_DIR` points at an install prefix holding `lib/` (or
    //   `lib64/`) and `include/`. CMake is skipped.
    // * otherwise the source tree at `LLAMA_CPP_DIR` (default: `llama.cpp/`
    //   next to the workspace root) is configured and built with CMake.
    let source_dir = env::var("LLAMA_CPP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../llama.cpp"));

    let install = match env::var("LLAMA_PREBUILT_DIR") {
        Ok(prefix) => prebuilt(Path::new(&prefix)),
        Err(_) => build_from_source(&source_dir, &target_os),
    };

    link(&install.lib_dir, &target_os);
    generate_bindings(&install, &source_dir);
}

fn lib_subdir(prefix: &Path) -> PathBuf {
    if prefix.join("lib64").exists() {
        prefix.join("lib64")
    } else {
        prefix.join("lib")
    }
}

fn prebuilt(prefix: &Path) -> LlamaInstall {
    assert!(
        prefix.exists(),
        "LLAMA_PREBUILT_DIR={} does not exist",
        prefix.display()
    );
    println!(
        "cargo:warning=lina: linking prebuilt llama.cpp from {}",
        prefix.display()
    );
    LlamaInstall {
        lib_dir: lib_subdir(prefix),
        include_dirs: vec![prefix.join("include")],
    }
}

fn build_from_source(source_dir: &Path, target_os: &str) -> LlamaInstall {
    assert!(
        source_dir.join("CMakeLists.txt").exists(),
        "llama.cpp source not found at {}. Clone it there, set LLAMA_CPP_DIR, \
         or point LLAMA_PREBUILT_DIR at an existing install.",
        source_dir.display()
    );

    let mut cfg = cmake::Config::new(source_dir);
    for flag in [
        "LLAMA_BUILD_SERVER",
        "LLAMA_BUILD_TESTS",
        "LLAMA_BUILD_EXAMPLES",
        "LLAMA_BUILD_TOOLS",
        "LLAMA_BUILD_COMMON",
        "LLAMA_CURL",
    ] {
        cfg.define(flag, "OFF");
    }
    cfg.define("BUILD_SHARED_LIBS", "OFF");

    if feature_enabled("CUDA") {
        cfg.define("GGML_CUDA", "ON");
    }
    if feature_enabled("VULKAN") {
        cfg.define("GGML_VULKAN", "ON");
    }
    if feature_enabled("ROCM") {
        let rocm = rocm_path();
        cfg.define("GGML_HIP", "ON")
            .define("CMAKE_HIP_COMPILER_ROCM_ROOT", &rocm)
            .define("CMAKE_HIP_FLAGS", format!("--rocm-path={rocm}"));
        if let Ok(targets) = env::var("AMDGPU_TARGETS") {
            cfg.define("AMDGPU_TARGETS", &targets);
        }
    }
    if target_os == "macos" {
        cfg.define("GGML_METAL", "ON");
    }

    let dst = cfg.build();
    LlamaInstall {
        lib_dir: lib_subdir(&dst),
        include_dirs: vec![dst.join("include"), source_dir.join("ggml/include")],
    }
}

fn feature_enabled(name: &str) -> bool {
    env::var(format!("CARGO_FEATURE_{name}")).is_ok()
}

fn rocm_path() -> String {
    env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".into())
}

fn link(lib_dir: &Path, target_os: &str) {
    let has = |name: &str| lib_dir.join(format!("lib{name}.a")).exists();

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=llama");
    for name in ["ggml", "ggml-base", "ggml-cpu"] {
        if has(name) {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    if feature_enabled("CUDA") && has("ggml-cuda") {
        println!("cargo:rustc-link-lib=static=ggml-cuda");
        for lib in ["cuda", "cublas", "culibos", "cudart"] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }
    if feature_enabled("VULKAN") && has("ggml-vulkan") {
        println!("cargo:rustc-link-lib=static=ggml-vulkan");
        println!("cargo:rustc-link-lib=vulkan");
    }
    if feature_enabled("ROCM") && has("ggml-hip") {
        println!("cargo:rustc-link-lib=static=ggml-hip");
        println!("cargo:rustc-link-search=native={}/lib", rocm_path());
        for lib in [
            "amdhip64",
            "hipblas",
            "hiprtc",
            "rocblas",
            "hsa-runtime64",
            "amd_comgr",
        ] {
            println!("cargo:rustc-link-lib={lib}");
        }
    }

    match target_os {
        "linux" => {
            for lib in ["stdc++", "m", "pthread", "gomp"] {
                println!("cargo:rustc-link-lib={lib}");
            }
        }
        "macos" => {
            for name in ["ggml-metal", "ggml-blas"] {
                if has(name) {
                    println!("cargo:rustc-link-lib=static={name}");
                }
            }
            for fw in ["Accelerate", "Metal", "MetalKit", "Foundation"] {
                println!("cargo:rustc-link-lib=framework={fw}");
            }
            println!("cargo:rustc-link-lib=c++");
        }
        "windows" => println!("cargo:rustc-link-lib=msvcrt"),
        _ => {}
    }
}

fn generate_bindings(install: &LlamaInstall, source_dir: &Path) {
    let mut builder = bindgen::Builder::default()
        .header("wrapper.h")
        .rust_edition(bindgen::RustEdition::Edition2024);

    let fallback_include = source_dir.join("include");
    for dir in install.include_dirs.iter().chain([&fallback_include]) {
        if dir.exists() {
            builder = builder.clang_arg(format!("-I{}", dir.display()));
        }
    }

    let bindings = builder
        .allowlist_function("llama_.*")
        .allowlist_function("ggml_backend_load_all")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_log_level")
        .allowlist_var("LLAMA_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .generate()
        .expect("bindgen failed to generate llama.cpp bindings");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("failed to write bindings.rs");
}
