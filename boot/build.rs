fn main() {
    let dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    println!("cargo:rustc-link-arg-bin=mbr=-T{}/mbr.ld", dir);
    println!("cargo:rustc-link-arg-bin=stage2=-T{}/stage2.ld", dir);
    println!("cargo:rerun-if-changed=mbr.ld");
    println!("cargo:rerun-if-changed=stage2.ld");
}
