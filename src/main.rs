mod demo_scenes;

use demo_scenes::ShowcaseScene;

fn main() {
    if let Err(err) = wgpu_frame_graph::run(ShowcaseScene::new()) {
        eprintln!("Application error: {err}");
    }
}
