fn main() {
    visionagenda_lib::run()
}
